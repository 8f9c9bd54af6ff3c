fn main() {
    // ESP-IDF sysenv propagation only applies to device builds; host
    // builds (and `cargo test`) have nothing to forward.
    if std::env::var_os("CARGO_FEATURE_ESPIDF").is_some() {
        embuild::espidf::sysenv::output();
    }
}
