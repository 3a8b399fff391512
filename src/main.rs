use colored::Colorize;

fn main() {
    chassis::init_tracing();
    if let Err(err) = chassis::run() {
        eprintln!("{} {:#}", "error:".red().bold(), err);
        std::process::exit(1);
    }
}
