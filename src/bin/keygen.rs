//! Generate a hex-encoded master secret for the token service.

use rand::RngCore;

fn main() {
    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    println!("{}", hex::encode(secret));
}
