fn main() {
    hat_check::run_cli();
}
