use clap::Parser;

#[tokio::main]
async fn main() {
    if let Err(err) = diamond_cli::run(diamond_cli::args::Cli::parse()).await {
        match diamond_cli::error_class(&err) {
            Some(class) => eprintln!("Error ({}): {:#}", class, err),
            None => eprintln!("Error: {:#}", err),
        }
        std::process::exit(1);
    }
}
