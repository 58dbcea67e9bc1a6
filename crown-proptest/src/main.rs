fn main() {
    println!("Run with: cargo test");
}
