//! Localized message catalog
//!
//! Defaults are Indonesian, the locale of the application. Every entry can be
//! overridden from configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Display messages attached to normalized errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorMessages {
    pub generic: String,
    pub network: String,
    pub offline: String,
    pub timeout: String,
    pub cancelled: String,
    pub session_expired: String,
    pub storage: String,
    pub quota_exceeded: String,
    pub image_too_large: String,
    pub image_invalid_type: String,
    pub invalid_request: String,
    pub parse: String,
    /// Fallback for HTTP statuses missing from `status`
    pub http_generic: String,
    /// Per-status messages keyed by the status code as text
    pub status: BTreeMap<String, String>,
}

impl Default for ErrorMessages {
    fn default() -> Self {
        let status = [
            ("400", "Permintaan tidak valid. Periksa kembali data Anda."),
            ("401", "Anda belum masuk atau sesi telah berakhir. Silakan masuk kembali."),
            ("403", "Anda tidak memiliki izin untuk mengakses data ini."),
            ("404", "Data yang diminta tidak ditemukan."),
            ("408", "Waktu permintaan habis. Silakan coba lagi."),
            ("409", "Data bertentangan dengan data yang sudah ada."),
            ("422", "Data yang dikirim tidak valid."),
            ("429", "Terlalu banyak permintaan. Silakan coba beberapa saat lagi."),
            ("500", "Terjadi kesalahan pada server. Silakan coba lagi nanti."),
            ("502", "Server sedang tidak dapat dijangkau. Silakan coba lagi nanti."),
            ("503", "Layanan sedang tidak tersedia. Silakan coba lagi nanti."),
            ("504", "Server tidak merespons tepat waktu. Silakan coba lagi nanti."),
        ]
        .into_iter()
        .map(|(code, message)| (code.to_string(), message.to_string()))
        .collect();

        Self {
            generic: "Terjadi kesalahan. Silakan coba lagi.".to_string(),
            network: "Gagal terhubung ke server. Periksa koneksi internet Anda.".to_string(),
            offline: "Anda sedang offline. Periksa koneksi internet Anda.".to_string(),
            timeout: "Permintaan memakan waktu terlalu lama. Silakan coba lagi.".to_string(),
            cancelled: "Permintaan dibatalkan.".to_string(),
            session_expired: "Sesi Anda telah berakhir. Silakan masuk kembali.".to_string(),
            storage: "Gagal menyimpan data di perangkat.".to_string(),
            quota_exceeded: "Penyimpanan perangkat penuh. Hapus beberapa data lalu coba lagi.".to_string(),
            image_too_large: "Ukuran gambar terlalu besar.".to_string(),
            image_invalid_type: "Format gambar tidak didukung.".to_string(),
            invalid_request: "Permintaan tidak valid.".to_string(),
            parse: "Respons server tidak dapat dibaca.".to_string(),
            http_generic: "Terjadi kesalahan saat menghubungi server.".to_string(),
            status,
        }
    }
}

impl ErrorMessages {
    /// Message for an HTTP status, falling back to `http_generic`
    pub fn for_status(&self, status: u16) -> &str {
        self.status
            .get(&status.to_string())
            .map(String::as_str)
            .unwrap_or(&self.http_generic)
    }
}
