use diannex::cli;
use diannex::style::Style;

fn main() {
    if let Err(error) = cli::run_cli() {
        eprintln!("{}", Style::bold_red(&error.to_string()));
        std::process::exit(1);
    }
}
