#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

mod unit {
    mod config_tests;
    mod session_model_tests;
    mod wire_tests;
}
