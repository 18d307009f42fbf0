fn main() {
    ember::cli::run_cli();
}
