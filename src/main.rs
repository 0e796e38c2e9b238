use warden::cli::Cli;

fn main() {
    if let Err(e) = Cli::run() {
        warden::cli::report_error(&e);
        std::process::exit(1);
    }
}
