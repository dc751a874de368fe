// src/main.rs

fn main() {
    ollachat_lib::run()
}
