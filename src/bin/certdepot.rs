use certdepot::cli::Options;

fn main() {
    if let Err(e) = Options::from_args().run() {
        eprintln!("{e}");
        ::std::process::exit(1);
    }
}
