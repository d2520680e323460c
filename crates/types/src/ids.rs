use rand::Rng;

fn hex_token(len: usize) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| HEX[rng.gen_range(0..16)] as char).collect()
}

/// Mints a fresh session identifier, `SES-<8-hex>`.
pub fn session_id() -> String {
    format!("SES-{}", hex_token(8))
}

/// Mints a fresh quality-check identifier, `QC-<8-hex>`.
pub fn qc_id() -> String {
    format!("QC-{}", hex_token(8))
}

/// Mints a fresh label identifier, `LBL-<8-hex>`.
pub fn label_id() -> String {
    format!("LBL-{}", hex_token(8))
}

/// Mints a fresh tracking number, `TRK-<12-hex>`.
pub fn tracking_no() -> String {
    format!("TRK-{}", hex_token(12))
}
