fn main() {
    if let Err(err) = ollama_chat::cli::main() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
