#![deny(unsafe_code)]

use std::{env, process::ExitCode};

fn main() -> ExitCode {
    authd::run(env::args_os())
}
