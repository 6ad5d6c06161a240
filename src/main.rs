mod app;
mod artifacts;
mod conductor;
mod config;
mod drift;
mod error;
mod paths;
mod process;
mod report_schema;
mod runlog;
mod sentinel;
mod triage;
mod types;
mod util;

fn main() {
    std::process::exit(app::run());
}
