
mod apply_tests;
mod concurrency_tests;
mod failure_tests;
mod replace_tests;
