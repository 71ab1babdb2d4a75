pub mod cli;
pub mod database_ops;
pub mod logging;
pub mod normalization;
pub mod orchestrator;
pub mod source;

pub mod util {
    pub mod env;
}
