//! Wi-Fi configuration utility for ESP32.
//!
//! Stores station credentials in NVS so the firmware boots straight into
//! `CONNECTING` instead of the provisioning portal.
//!
//! Usage:
//!   WIFI_SSID="MyNetwork" WIFI_PASSWORD="secret" cargo configure-wifi
//!
//! For open networks (no password):
//!   WIFI_SSID="OpenNetwork" WIFI_PASSWORD="" cargo configure-wifi

/// Set via WIFI_SSID at compile time.
#[cfg(feature = "esp32")]
const WIFI_SSID: Option<&str> = option_env!("WIFI_SSID");

/// Set via WIFI_PASSWORD at compile time. Empty for open networks.
#[cfg(feature = "esp32")]
const WIFI_PASSWORD: Option<&str> = option_env!("WIFI_PASSWORD");

/// Print error message and exit after the serial console has caught up.
#[cfg(feature = "esp32")]
fn halt_with_error(msg: &str) -> ! {
    eprintln!("\n{}", msg);
    eprintln!("\n=== Configuration failed ===\n");
    std::thread::sleep(std::time::Duration::from_secs(2));
    std::process::exit(1);
}

#[cfg(feature = "esp32")]
fn main() {
    use mqtt_station_esp32::store::NvsStore;
    use mqtt_station_esp32::NetworkCredentials;

    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    println!("\n=== Wi-Fi Configuration Utility ===\n");

    let ssid = match WIFI_SSID {
        Some(s) if !s.is_empty() => s,
        _ => halt_with_error(
            "Error: WIFI_SSID environment variable not set at compile time.\n\n\
             Usage:\n  \
             WIFI_SSID=\"MyNetwork\" WIFI_PASSWORD=\"secret\" cargo configure-wifi",
        ),
    };
    let password = WIFI_PASSWORD.unwrap_or("");

    println!("SSID: {}", ssid);
    println!(
        "Password: {} ({} chars)",
        if password.is_empty() { "(none)" } else { "****" },
        password.len()
    );

    let credentials = match NetworkCredentials::new(ssid, password) {
        Ok(credentials) => credentials,
        Err(e) => halt_with_error(&format!("Error: {}", e)),
    };

    let mut store = match NvsStore::take() {
        Ok(store) => store,
        Err(e) => halt_with_error(&format!("Error initializing NVS: {}", e)),
    };

    if let Err(e) = credentials.save(&mut store) {
        halt_with_error(&format!("Error saving to NVS: {}", e));
    }

    println!("\n=== Wi-Fi configuration saved to NVS ===");
    println!("Credentials persist across reboots; POST /reset on the portal clears them.");
    println!("\n=== Done - you can disconnect the device ===\n");

    std::thread::sleep(std::time::Duration::from_secs(2));
}

#[cfg(not(feature = "esp32"))]
fn main() {
    eprintln!("This binary must be built for ESP32.");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  WIFI_SSID=\"MyNetwork\" WIFI_PASSWORD=\"secret\" cargo configure-wifi");
    std::process::exit(1);
}
