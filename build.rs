fn main() {
    // ESP-IDF environment is only needed for the firmware build; host builds
    // (tests, host-node) skip it.
    let target = std::env::var("TARGET").unwrap_or_default();
    if target.contains("xtensa") || target.contains("espidf") {
        embuild::espidf::sysenv::output();
    }
}
