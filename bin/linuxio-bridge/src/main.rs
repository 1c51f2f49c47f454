#![deny(unsafe_code)]

use std::{env, process::ExitCode};

fn main() -> ExitCode {
    bridge::run(env::args_os())
}
