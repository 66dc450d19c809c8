fn main() {
    if let Err(err) = flowcap_lib::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
