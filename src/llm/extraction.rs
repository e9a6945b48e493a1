//! Extraction prompt and parsing of the model's JSON answer into
//! [`DocumentData`].

use crate::document::{DocumentData, DocumentType};
use crate::llm::AiError;
use crate::utils::digits_only;
use serde_json::Value;
use tracing::warn;

/// Instructions sent with every document photo
pub const EXTRACTION_PROMPT: &str = r#"Sebagai ahli data entry untuk dokumen resmi Indonesia, ekstrak informasi dari gambar KTP atau NPWP.
Kembalikan hasilnya HANYA dalam format JSON yang valid, tanpa penjelasan tambahan.

PENTING: Pastikan semua nomor hanya berisi DIGIT (0-9), tanpa titik, strip, atau spasi.

Ekstrak data berikut:
- "document_type": Identifikasi sebagai "KTP" atau "NPWP" (WAJIB)
- "nama": Nama lengkap sesuai dokumen (WAJIB)
- "nik": NIK 16 digit dari KTP. Jika dokumen ini NPWP, berikan null
- "npwp_15": NPWP 15 digit tanpa format. Jika dokumen ini KTP, berikan null
- "npwp_16": NPWP 16 digit tanpa format. Jika dokumen ini KTP, berikan null
- "alamat": Alamat lengkap dan terstruktur

Aturan NPWP:
- NPWP biasanya dalam format: xx.xxx.xxx.x-xxx.xxx (15 digit)
- Ekstrak HANYA angka, buang semua titik dan strip
- Contoh: "86.655.529.5-602.000" → npwp_15: "866555295602000"
- Jika ada NPWP 16 digit, masukkan ke npwp_16
- Jika NPWP dimulai dengan 0, tetap sertakan 0 tersebut

Aturan alamat:
- Untuk KTP: Sertakan RT, RW, Kelurahan/Desa, Kecamatan, Kabupaten/Kota, Provinsi
- Untuk NPWP: Alamat sesuai yang tertera di dokumen
- Gabungkan dengan pemisah koma untuk struktur yang jelas

Jika ada field yang tidak dapat dibaca atau tidak ada, berikan null.

Format response:
{
    "document_type": "KTP" atau "NPWP",
    "nama": "string",
    "nik": "string 16 digit atau null",
    "npwp_15": "string 15 digit atau null",
    "npwp_16": "string 16 digit atau null",
    "alamat": "string atau null"
}"#;

/// Parses the model's answer.
///
/// `document_type` and `nama` are required; NIK is only kept for KTP and the
/// NPWP numbers only for NPWP.
///
/// # Errors
///
/// Returns `AiError::InvalidResponse` for missing fields, an unknown document
/// type or an empty name.
pub fn parse_extraction(raw: &Value) -> Result<DocumentData, AiError> {
    let doc_type_raw = raw
        .get("document_type")
        .ok_or_else(|| AiError::InvalidResponse("Missing document_type in AI response".into()))?;
    let nama_raw = raw
        .get("nama")
        .ok_or_else(|| AiError::InvalidResponse("Missing nama in AI response".into()))?;

    let doc_type_str = doc_type_raw.as_str().unwrap_or_default();
    let document_type = DocumentType::parse(doc_type_str).ok_or_else(|| {
        AiError::InvalidResponse(format!("Invalid document type: {doc_type_str}"))
    })?;

    let nama = nama_raw.as_str().unwrap_or_default().trim();
    if nama.is_empty() {
        return Err(AiError::InvalidResponse("Empty nama in AI response".into()));
    }

    let (nik, npwp_15, npwp_16) = match document_type {
        DocumentType::Ktp => (clean_and_validate_number(raw.get("nik"), 16), None, None),
        DocumentType::Npwp => (
            None,
            clean_and_validate_number(raw.get("npwp_15"), 15),
            clean_and_validate_number(raw.get("npwp_16"), 16),
        ),
    };

    let alamat = raw.get("alamat").and_then(Value::as_str);

    Ok(DocumentData::new(
        document_type,
        nama,
        alamat,
        nik.as_deref(),
        npwp_15.as_deref(),
        npwp_16.as_deref(),
    ))
}

/// Normalizes an id number to its expected length.
///
/// 15-digit fields also accept 16 digits with a leading `0` (dropped).
/// 16-digit fields also accept 15 digits (a `0` is prepended).
/// Anything else is discarded with a warning.
#[must_use]
pub fn clean_and_validate_number(value: Option<&Value>, expected_len: usize) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let cleaned = digits_only(&text);
    if cleaned.is_empty() {
        return None;
    }

    match (expected_len, cleaned.len()) {
        (15, 15) | (16, 16) => Some(cleaned),
        (15, 16) if cleaned.starts_with('0') => Some(cleaned[1..].to_string()),
        (16, 15) => Some(format!("0{cleaned}")),
        (expected, got) => {
            warn!("Number length mismatch: expected {expected}, got {got}");
            None
        }
    }
}

/// Parses message content that should hold a JSON object.
///
/// Tolerates code fences or prose around the object by taking the first
/// balanced `{...}` that parses.
///
/// # Errors
///
/// Returns `AiError::JsonError` when no JSON object can be found.
pub fn parse_json_content(content: &str) -> Result<Value, AiError> {
    let trimmed = content.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    extract_first_json(trimmed)
        .and_then(|json| serde_json::from_str(&json).ok())
        .ok_or_else(|| {
            AiError::JsonError(format!(
                "No JSON object in response: {}",
                crate::utils::truncate_str(trimmed, 100)
            ))
        })
}

/// First complete JSON object in a string
fn extract_first_json(input: &str) -> Option<String> {
    let mut depth = 0usize;
    let mut start_idx = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in input.char_indices() {
        match ch {
            '{' if !in_string => {
                if start_idx.is_none() {
                    start_idx = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                if depth == 1 {
                    if let Some(start) = start_idx {
                        let json_str = input[start..=i].trim();
                        if serde_json::from_str::<Value>(json_str).is_ok() {
                            return Some(json_str.to_string());
                        }
                    }
                }
                depth -= 1;
                if depth == 0 {
                    start_idx = None;
                }
            }
            '"' if !escaped => in_string = !in_string,
            '\\' if in_string => escaped = !escaped,
            _ => {}
        }
        if ch != '\\' {
            escaped = false;
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ktp_drops_npwp_fields() {
        let raw = json!({
            "document_type": "KTP",
            "nama": "  BUDI SANTOSO ",
            "nik": "3201-0123-4567-0001",
            "npwp_15": "866555295602000",
            "alamat": "Jl. Merdeka No. 1, RT 001/RW 002"
        });

        let doc = parse_extraction(&raw).expect("valid KTP");
        assert_eq!(doc.document_type, DocumentType::Ktp);
        assert_eq!(doc.nama, "BUDI SANTOSO");
        assert_eq!(doc.nik.as_deref(), Some("3201012345670001"));
        assert!(doc.npwp_15.is_none());
        assert!(doc.npwp_16.is_none());
    }

    #[test]
    fn test_parse_npwp_drops_nik() {
        let raw = json!({
            "document_type": "npwp",
            "nama": "PT MAJU JAYA",
            "nik": "3201012345670001",
            "npwp_15": "86.655.529.5-602.000",
            "npwp_16": null,
            "alamat": null
        });

        let doc = parse_extraction(&raw).expect("valid NPWP");
        assert_eq!(doc.document_type, DocumentType::Npwp);
        assert!(doc.nik.is_none());
        assert_eq!(doc.npwp_15.as_deref(), Some("866555295602000"));
        assert!(doc.npwp_16.is_none());
        assert!(doc.alamat.is_none());
    }

    #[test]
    fn test_parse_rejects_bad_answers() {
        assert!(parse_extraction(&json!({"nama": "A"})).is_err());
        assert!(parse_extraction(&json!({"document_type": "KTP"})).is_err());
        assert!(parse_extraction(&json!({"document_type": "SIM", "nama": "A"})).is_err());
        assert!(parse_extraction(&json!({"document_type": "KTP", "nama": "  "})).is_err());
    }

    #[test]
    fn test_clean_and_validate_number() {
        let v = |s: &str| Some(json!(s));

        assert_eq!(
            clean_and_validate_number(v("866555295602000").as_ref(), 15).as_deref(),
            Some("866555295602000")
        );
        assert_eq!(
            clean_and_validate_number(v("0866555295602000").as_ref(), 15).as_deref(),
            Some("866555295602000")
        );
        assert_eq!(
            clean_and_validate_number(v("866555295602000").as_ref(), 16).as_deref(),
            Some("0866555295602000")
        );
        assert_eq!(clean_and_validate_number(v("1866555295602000").as_ref(), 15), None);
        assert_eq!(clean_and_validate_number(v("12345").as_ref(), 16), None);
        assert_eq!(clean_and_validate_number(v("--").as_ref(), 16), None);
        assert_eq!(clean_and_validate_number(Some(&Value::Null), 16), None);
        assert_eq!(clean_and_validate_number(None, 16), None);
    }

    #[test]
    fn test_parse_json_content_handles_fences() {
        let fenced = "```json\n{\"document_type\": \"KTP\", \"nama\": \"A {B}\"}\n```";
        let value = parse_json_content(fenced).expect("fenced JSON");
        assert_eq!(value["nama"], "A {B}");

        let plain = parse_json_content("{\"nama\": \"C\"}").expect("plain JSON");
        assert_eq!(plain["nama"], "C");

        assert!(matches!(
            parse_json_content("Maaf, gambar tidak jelas"),
            Err(AiError::JsonError(_))
        ));
    }
}
