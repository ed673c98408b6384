use bcrypt::hash;
use case_backend::services::users::BCRYPT_COST;
use std::env;

fn main() {
    let password = env::args().nth(1).unwrap_or_else(|| {
        eprintln!("Usage: cargo run --bin hash-password <PASSWORD>");
        std::process::exit(1);
    });

    match hash(&password, BCRYPT_COST) {
        Ok(hashed) => {
            println!("\nCost : {}", BCRYPT_COST);
            println!("Hash : {}\n", hashed);
            println!("# Seed an operator account by hand:");
            println!(
                "INSERT INTO \"user\" (email, password, created_at, updated_at) \
                 VALUES ('<EMAIL>', '{}', strftime('%Y-%m-%dT%H:%M:%SZ', 'now'), \
                 strftime('%Y-%m-%dT%H:%M:%SZ', 'now'));",
                hashed
            );
        }
        Err(e) => {
            eprintln!("Error hashing password: {}", e);
            std::process::exit(1);
        }
    }
}
