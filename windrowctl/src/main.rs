use clap::Parser;

fn main() {
    let cli = windrowctl::Cli::parse();
    if let Err(err) = windrowctl::run(cli) {
        eprintln!("erro: {err}");
        std::process::exit(1);
    }
}
