fn main() {
    if let Err(err) = lm_calendar_lib::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
