pub mod billing;
pub mod fixer;
pub mod vault;
