//! Field validators for KTP/NPWP data.
//!
//! Error messages are user-facing (Indonesian) and are sent to the chat as is.

use crate::document::{DocumentData, DocumentType, EditableField};
use crate::utils::digits_only;
use chrono::{Datelike, Utc};
use thiserror::Error;

/// Province codes accepted as the first two NIK digits
const PROVINCE_CODES: &[&str] = &[
    "11", "12", "13", "14", "15", "16", "17", "18", "19", // Sumatera
    "21", "22", "23", "24", "25", "26", // Sumatera (cont.)
    "31", "32", "33", "34", "35", "36", // Jawa
    "51", "52", "53", // Bali, NTB, NTT
    "61", "62", "63", "64", "65", // Kalimantan
    "71", "72", "73", "74", "75", "76", // Sulawesi
    "81", "82", // Maluku
    "91", "92", "93", "94", // Papua
];

const RESERVED_NAMES: &[&str] = &["test", "testing", "admin", "user", "null", "undefined"];

const ADDRESS_COMPONENTS: &[&str] = &["rt", "rw", "kel", "kec", "kab", "kot", "prov"];

/// Validation failure with a user-facing message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Value is empty
    #[error("{0} tidak boleh kosong")]
    Empty(&'static str),
    /// Wrong number of digits
    #[error("{field} harus {expected} digit, ditemukan {found} digit")]
    Length {
        /// Field label
        field: &'static str,
        /// Required digit count
        expected: usize,
        /// Digits present
        found: usize,
    },
    /// Non-digit characters left after removing separators
    #[error("{field} harus berisi {expected} digit angka")]
    NotNumeric {
        /// Field label
        field: &'static str,
        /// Required digit count
        expected: usize,
    },
    /// Every digit is zero
    #[error("{0} tidak valid (semua angka nol)")]
    AllZeros(&'static str),
    /// Every digit is the same
    #[error("{0} tidak valid (semua angka sama)")]
    AllSame(&'static str),
    /// Unknown province prefix
    #[error("Kode provinsi tidak valid: {0}")]
    ProvinceCode(String),
    /// Impossible DDMMYY segment
    #[error("Format tanggal lahir dalam NIK tidak valid")]
    BirthDate,
    /// Below minimum length
    #[error("{field} terlalu pendek (minimum {min} karakter)")]
    TooShort {
        /// Field label
        field: &'static str,
        /// Minimum characters
        min: usize,
    },
    /// Above maximum length
    #[error("{field} terlalu panjang (maksimum {max} karakter)")]
    TooLong {
        /// Field label
        field: &'static str,
        /// Maximum characters
        max: usize,
    },
    /// Name made of digits and symbols
    #[error("Nama tidak valid (hanya berisi angka atau simbol)")]
    NameSymbolsOnly,
    /// Placeholder name such as `test`
    #[error("Nama '{0}' tidak diperbolehkan")]
    NameReserved(String),
    /// Name is one repeated character
    #[error("Nama tidak valid (karakter berulang)")]
    NameRepeated,
    /// Address lacks RT/RW/Kelurahan/Kecamatan parts
    #[error("Alamat harus mencakup minimal RT/RW, Kelurahan, dan Kecamatan")]
    AddressIncomplete,
    /// Document type other than KTP/NPWP
    #[error("Tipe dokumen harus KTP atau NPWP")]
    DocumentType,
    /// Zero-byte upload
    #[error("File kosong atau tidak valid")]
    FileEmpty,
    /// Upload over the configured limit
    #[error("File terlalu besar ({size_mb}MB). Maksimal {max_mb}MB")]
    FileTooLarge {
        /// Actual size, one decimal
        size_mb: String,
        /// Configured limit
        max_mb: u64,
    },
}

/// Validates a 16 digit NIK: province code and the DDMMYY birth date.
///
/// # Errors
///
/// Returns the first rule the value breaks.
pub fn validate_nik(nik: &str) -> Result<(), ValidationError> {
    validate_nik_with_year(nik, Utc::now().year())
}

fn validate_nik_with_year(nik: &str, current_year: i32) -> Result<(), ValidationError> {
    const FIELD: &str = "NIK";

    if nik.trim().is_empty() {
        return Err(ValidationError::Empty(FIELD));
    }
    let clean = digits_only(nik);
    if clean.len() != 16 {
        return Err(ValidationError::Length {
            field: FIELD,
            expected: 16,
            found: clean.len(),
        });
    }
    if clean.chars().all(|c| c == '0') {
        return Err(ValidationError::AllZeros(FIELD));
    }
    if clean.chars().all(|c| c == '1') {
        return Err(ValidationError::AllSame(FIELD));
    }

    let province = &clean[..2];
    if !PROVINCE_CODES.contains(&province) {
        return Err(ValidationError::ProvinceCode(province.to_string()));
    }

    if !is_valid_nik_date(&clean[6..12], current_year) {
        return Err(ValidationError::BirthDate);
    }
    Ok(())
}

/// DDMMYY, female birth days carry +40
fn is_valid_nik_date(date: &str, current_year: i32) -> bool {
    let parse = |range: std::ops::Range<usize>| date.get(range).and_then(|s| s.parse::<i32>().ok());
    let (Some(mut day), Some(month), Some(year)) = (parse(0..2), parse(2..4), parse(4..6)) else {
        return false;
    };

    if day > 40 {
        day -= 40;
    }
    if !(1..=31).contains(&day) || !(1..=12).contains(&month) {
        return false;
    }

    let full_year = if year > 50 { 1900 + year } else { 2000 + year };
    full_year <= current_year
}

/// Validates a 15 digit NPWP (dots, dashes and spaces allowed).
///
/// # Errors
///
/// Returns the first rule the value breaks.
pub fn validate_npwp_15(npwp: &str) -> Result<(), ValidationError> {
    validate_npwp(npwp, 15, "NPWP")
}

/// Validates a 16 digit NPWP (dots, dashes and spaces allowed).
///
/// # Errors
///
/// Returns the first rule the value breaks.
pub fn validate_npwp_16(npwp: &str) -> Result<(), ValidationError> {
    validate_npwp(npwp, 16, "NPWP")
}

fn validate_npwp(npwp: &str, expected: usize, field: &'static str) -> Result<(), ValidationError> {
    if npwp.trim().is_empty() {
        return Err(ValidationError::Empty(field));
    }
    let clean: String = npwp
        .chars()
        .filter(|c| !matches!(c, '.' | '-') && !c.is_whitespace())
        .collect();
    let found = clean.chars().count();
    if found != expected {
        return Err(ValidationError::Length {
            field,
            expected,
            found,
        });
    }
    if !clean.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::NotNumeric { field, expected });
    }
    if clean.chars().all(|c| c == '0') {
        return Err(ValidationError::AllZeros(field));
    }
    Ok(())
}

/// Validates a holder name.
///
/// # Errors
///
/// Returns the first rule the value breaks.
pub fn validate_nama(nama: &str) -> Result<(), ValidationError> {
    const FIELD: &str = "Nama";
    let nama = nama.trim();
    if nama.is_empty() {
        return Err(ValidationError::Empty(FIELD));
    }

    let len = nama.chars().count();
    if len < 2 {
        return Err(ValidationError::TooShort { field: FIELD, min: 2 });
    }
    if len > 100 {
        return Err(ValidationError::TooLong {
            field: FIELD,
            max: 100,
        });
    }
    if !nama.chars().any(char::is_alphabetic) {
        return Err(ValidationError::NameSymbolsOnly);
    }
    if RESERVED_NAMES.contains(&nama.to_lowercase().as_str()) {
        return Err(ValidationError::NameReserved(nama.to_string()));
    }

    let mut distinct: Vec<char> = nama
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    distinct.sort_unstable();
    distinct.dedup();
    if distinct.len() < 2 {
        return Err(ValidationError::NameRepeated);
    }
    Ok(())
}

/// Validates an address: length and at least two administrative parts.
///
/// # Errors
///
/// Returns the first rule the value breaks.
pub fn validate_alamat(alamat: &str) -> Result<(), ValidationError> {
    const FIELD: &str = "Alamat";
    let alamat = alamat.trim();
    if alamat.is_empty() {
        return Err(ValidationError::Empty(FIELD));
    }

    let len = alamat.chars().count();
    if len < 10 {
        return Err(ValidationError::TooShort {
            field: FIELD,
            min: 10,
        });
    }
    if len > 500 {
        return Err(ValidationError::TooLong {
            field: FIELD,
            max: 500,
        });
    }

    let lower = alamat.to_lowercase();
    let components = ADDRESS_COMPONENTS
        .iter()
        .filter(|part| lower.contains(*part))
        .count();
    if components < 2 {
        return Err(ValidationError::AddressIncomplete);
    }
    Ok(())
}

/// Validates a value typed by the user for one field.
///
/// # Errors
///
/// Returns the validation failure to show in the chat.
pub fn validate_edit_value(field: EditableField, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty("Nilai"));
    }
    match field {
        EditableField::DocumentType => DocumentType::parse(value)
            .map(|_| ())
            .ok_or(ValidationError::DocumentType),
        EditableField::Nama => validate_nama(value),
        EditableField::Alamat => validate_alamat(value),
        EditableField::Nik => validate_nik(value),
        EditableField::Npwp15 => validate_npwp_15(value),
        EditableField::Npwp16 => validate_npwp_16(value),
    }
}

/// Validates a whole record, returning `"<Field>: <message>"` entries.
#[must_use]
pub fn validate_document(doc: &DocumentData) -> Vec<String> {
    let mut errors = Vec::new();
    let mut check = |label: &str, result: Result<(), ValidationError>| {
        if let Err(e) = result {
            errors.push(format!("{label}: {e}"));
        }
    };

    check("Nama", validate_nama(&doc.nama));
    if let Some(alamat) = &doc.alamat {
        check("Alamat", validate_alamat(alamat));
    }

    match doc.document_type {
        DocumentType::Ktp => check("NIK", validate_nik(doc.nik.as_deref().unwrap_or_default())),
        DocumentType::Npwp => {
            check(
                "NPWP 15",
                validate_npwp_15(doc.npwp_15.as_deref().unwrap_or_default()),
            );
            if let Some(npwp_16) = &doc.npwp_16 {
                check("NPWP 16", validate_npwp_16(npwp_16));
            }
        }
    }
    errors
}

/// Checks an upload size against a megabyte limit.
///
/// # Errors
///
/// Returns `FileEmpty` for zero bytes and `FileTooLarge` above the limit.
#[allow(clippy::cast_precision_loss)]
pub fn validate_file_size(size_bytes: u64, max_mb: u64) -> Result<(), ValidationError> {
    if size_bytes == 0 {
        return Err(ValidationError::FileEmpty);
    }
    if size_bytes > max_mb * 1024 * 1024 {
        return Err(ValidationError::FileTooLarge {
            size_mb: format!("{:.1}", size_bytes as f64 / 1024.0 / 1024.0),
            max_mb,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_nik() {
        // Jawa Barat, born 12-05-1990
        assert_eq!(validate_nik("3201011205900001"), Ok(()));
        // female birth day (+40), separators ignored
        assert_eq!(validate_nik("3201 0152 0590 0001"), Ok(()));
    }

    #[test]
    fn test_nik_rules() {
        assert_eq!(validate_nik(""), Err(ValidationError::Empty("NIK")));
        assert!(matches!(
            validate_nik("320101120590"),
            Err(ValidationError::Length { found: 12, .. })
        ));
        assert_eq!(
            validate_nik("0000000000000000"),
            Err(ValidationError::AllZeros("NIK"))
        );
        assert_eq!(
            validate_nik("1111111111111111"),
            Err(ValidationError::AllSame("NIK"))
        );
        assert_eq!(
            validate_nik("9901011205900001"),
            Err(ValidationError::ProvinceCode("99".to_string()))
        );
        assert_eq!(
            validate_nik("3201013213900001"),
            Err(ValidationError::BirthDate)
        );
    }

    #[test]
    fn test_nik_birth_year_not_in_future() {
        assert_eq!(
            validate_nik_with_year("3201011205300001", 2025),
            Err(ValidationError::BirthDate)
        );
        assert_eq!(validate_nik_with_year("3201011205300001", 2031), Ok(()));
    }

    #[test]
    fn test_npwp_validation() {
        assert_eq!(validate_npwp_15("01.234.567.8-901.000"), Ok(()));
        assert_eq!(validate_npwp_16("0123 4567 8901 0000"), Ok(()));
        assert!(matches!(
            validate_npwp_15("0123456789010001"),
            Err(ValidationError::Length {
                expected: 15,
                found: 16,
                ..
            })
        ));
        assert_eq!(
            validate_npwp_15("01234567890100A"),
            Err(ValidationError::NotNumeric {
                field: "NPWP",
                expected: 15
            })
        );
        assert_eq!(
            validate_npwp_16("0000000000000000"),
            Err(ValidationError::AllZeros("NPWP"))
        );
    }

    #[test]
    fn test_nama_rules() {
        assert_eq!(validate_nama("Budi Santoso"), Ok(()));
        assert!(matches!(
            validate_nama("B"),
            Err(ValidationError::TooShort { .. })
        ));
        assert_eq!(validate_nama("123-456"), Err(ValidationError::NameSymbolsOnly));
        assert_eq!(
            validate_nama("Admin"),
            Err(ValidationError::NameReserved("Admin".to_string()))
        );
        assert_eq!(validate_nama("aa aa"), Err(ValidationError::NameRepeated));
        assert!(matches!(
            validate_nama(&"x".repeat(101)),
            Err(ValidationError::TooLong { max: 100, .. })
        ));
    }

    #[test]
    fn test_alamat_rules() {
        assert_eq!(
            validate_alamat("Jl. Mawar No. 5 RT 003 RW 004 Kel. Sukamaju"),
            Ok(())
        );
        assert_eq!(
            validate_alamat("Jalan Mawar Nomor Lima"),
            Err(ValidationError::AddressIncomplete)
        );
        assert!(matches!(
            validate_alamat("Jl. A"),
            Err(ValidationError::TooShort { min: 10, .. })
        ));
    }

    #[test]
    fn test_validate_document_prefixes_fields() {
        let doc = DocumentData::new(DocumentType::Npwp, "X", Some("pendek"), None, None, None);
        let errors = validate_document(&doc);

        assert_eq!(errors.len(), 3);
        assert!(errors[0].starts_with("Nama: "));
        assert!(errors[1].starts_with("Alamat: "));
        assert!(errors[2].starts_with("NPWP 15: "));
    }

    #[test]
    fn test_edit_value() {
        assert_eq!(
            validate_edit_value(EditableField::DocumentType, "sim"),
            Err(ValidationError::DocumentType)
        );
        assert_eq!(validate_edit_value(EditableField::DocumentType, "npwp"), Ok(()));
        assert_eq!(
            validate_edit_value(EditableField::Nama, "   "),
            Err(ValidationError::Empty("Nilai"))
        );
        assert_eq!(
            validate_edit_value(EditableField::Nama, "   ").map_err(|e| e.to_string()),
            Err("Nilai tidak boleh kosong".to_string())
        );
    }

    #[test]
    fn test_file_size() {
        assert_eq!(validate_file_size(1024, 20), Ok(()));
        assert_eq!(validate_file_size(0, 20), Err(ValidationError::FileEmpty));
        let err = validate_file_size(25 * 1024 * 1024, 20).map_err(|e| e.to_string());
        assert_eq!(err, Err("File terlalu besar (25.0MB). Maksimal 20MB".to_string()));
    }
}
