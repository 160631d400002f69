fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Packaged builds without a .git directory can supply the hash directly.
    println!("cargo:rerun-if-env-changed=HELPDESK_GIT_HASH");
    if let Ok(hash) = std::env::var("HELPDESK_GIT_HASH") {
        println!("cargo:rustc-env=HELPDESK_GIT_HASH={}", hash);
    }
}
