// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod fetch_errors;
pub mod showcase;
pub mod utils;

pub use utils::*;
