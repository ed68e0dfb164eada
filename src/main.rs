fn main() -> std::process::ExitCode {
    stack_launcher_lib::run()
}
