//! dbgtest CLI entry point

fn main() {
    dbgtest::cli::run();
}
