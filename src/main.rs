fn main() {
    skinlens_lib::run()
}
