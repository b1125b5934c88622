use std::process::ExitCode;

mod action;
mod app;
mod capabilities;
mod cli;
mod command;
mod config;
mod dispatch;
mod doctor;
mod error;
mod logger;
mod response;
mod sandbox;
mod sanitize;
mod shell;
mod watcher;


fn main() -> ExitCode {
    app::main()
}
