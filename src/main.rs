use std::env;
use std::process::exit;

use whoop_driver::cli;

fn main() {
    let code = cli::run(env::args_os());
    exit(code.as_i32());
}
