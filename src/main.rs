//! glided - main entrypoint
// (c) 2025 The glided developers

use std::process::ExitCode;

fn main() -> ExitCode {
    glided::main()
}
