/*!
Fixtures de scans pour les tests

Génère des CSV déterministes ressemblant aux exports des scanners :
une ligne d'en-tête puis `rows` lignes de mesures.
*/

/// Scan WiFi : bssid, ssid, rssi, frequency, timestamp
pub fn wifi_scan_csv(rows: usize) -> Vec<u8> {
    let mut csv = String::from("bssid,ssid,rssi,frequency,timestamp\n");
    for i in 0..rows {
        csv.push_str(&format!(
            "{},lab-ap-{},{},{},{}\n",
            mac(0x0a, i),
            i % 4,
            -40 - (i as i64 % 50),
            if i % 2 == 0 { 2412 } else { 5180 },
            1_700_000_000 + i as u64
        ));
    }
    csv.into_bytes()
}

/// Scan BLE : mac, rssi, tx_power, timestamp
pub fn ble_scan_csv(rows: usize) -> Vec<u8> {
    let mut csv = String::from("mac,rssi,tx_power,timestamp\n");
    for i in 0..rows {
        csv.push_str(&format!(
            "{},{},{},{}\n",
            mac(0xbe, i),
            -60 - (i as i64 % 30),
            -12,
            1_700_000_000 + i as u64
        ));
    }
    csv.into_bytes()
}

fn mac(prefix: u8, i: usize) -> String {
    format!("{:02x}:00:00:00:{:02x}:{:02x}", prefix, (i >> 8) & 0xff, i & 0xff)
}
