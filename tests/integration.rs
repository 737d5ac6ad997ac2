#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

mod integration {
    mod journal_tests;
    mod session_manager_tests;
}
