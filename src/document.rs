//! Extracted KTP/NPWP data and its spreadsheet representation.

use crate::utils::digits_only;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported identity documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentType {
    /// National identity card
    #[serde(rename = "KTP")]
    Ktp,
    /// Taxpayer registration card
    #[serde(rename = "NPWP")]
    Npwp,
}

impl DocumentType {
    /// Parses `KTP`/`NPWP` ignoring case and surrounding whitespace
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "KTP" => Some(Self::Ktp),
            "NPWP" => Some(Self::Npwp),
            _ => None,
        }
    }

    /// Wire string written to column A
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ktp => "KTP",
            Self::Npwp => "NPWP",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// NPWP holder kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NpwpType {
    /// Individual taxpayer
    Personal,
    /// Company taxpayer
    Company,
}

impl NpwpType {
    /// Parses `personal`/`company`
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "personal" => Some(Self::Personal),
            "company" => Some(Self::Company),
            _ => None,
        }
    }

    /// Indonesian label
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Personal => "Orang Pribadi",
            Self::Company => "Perusahaan",
        }
    }
}

/// Fields the user may correct before saving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditableField {
    /// KTP or NPWP
    DocumentType,
    /// Holder name
    Nama,
    /// Address
    Alamat,
    /// 16 digit national id
    Nik,
    /// 15 digit NPWP
    Npwp15,
    /// 16 digit NPWP
    Npwp16,
}

impl EditableField {
    /// Every editable field in keyboard order
    pub const ALL: [Self; 6] = [
        Self::DocumentType,
        Self::Nama,
        Self::Alamat,
        Self::Nik,
        Self::Npwp15,
        Self::Npwp16,
    ];

    /// Key used in callback data (`edit_<key>`)
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::DocumentType => "document_type",
            Self::Nama => "nama",
            Self::Alamat => "alamat",
            Self::Nik => "nik",
            Self::Npwp15 => "npwp_15",
            Self::Npwp16 => "npwp_16",
        }
    }

    /// Inverse of [`EditableField::key`]
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }

    /// Label shown on buttons and prompts
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::DocumentType => "Tipe Dokumen",
            Self::Nama => "Nama",
            Self::Alamat => "Alamat",
            Self::Nik => "NIK",
            Self::Npwp15 => "NPWP (15 Digit)",
            Self::Npwp16 => "NPWP (16 Digit)",
        }
    }
}

/// Data extracted from a KTP/NPWP photo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentData {
    /// Document kind
    pub document_type: DocumentType,
    /// Holder name
    pub nama: String,
    /// Address
    pub alamat: Option<String>,
    /// NIK, digits only
    pub nik: Option<String>,
    /// 15 digit NPWP, digits only
    pub npwp_15: Option<String>,
    /// 16 digit NPWP, digits only
    pub npwp_16: Option<String>,
    /// Personal or company, NPWP only
    pub npwp_type: Option<NpwpType>,
    /// Extraction time
    pub extracted_at: DateTime<Utc>,
    /// AI backend that produced the data
    pub ai_service: Option<String>,
}

impl DocumentData {
    /// Builds a record, trimming text and stripping non-digits from ids.
    /// Empty values become `None`.
    #[must_use]
    pub fn new(
        document_type: DocumentType,
        nama: &str,
        alamat: Option<&str>,
        nik: Option<&str>,
        npwp_15: Option<&str>,
        npwp_16: Option<&str>,
    ) -> Self {
        Self {
            document_type,
            nama: nama.trim().to_string(),
            alamat: clean_text(alamat),
            nik: clean_number(nik),
            npwp_15: clean_number(npwp_15),
            npwp_16: clean_number(npwp_16),
            npwp_type: None,
            extracted_at: Utc::now(),
            ai_service: None,
        }
    }

    /// True for company NPWP
    #[must_use]
    pub fn is_company_npwp(&self) -> bool {
        self.document_type == DocumentType::Npwp && self.npwp_type == Some(NpwpType::Company)
    }

    /// ID TKU for company NPWP: `0` + NPWP-15 + `000000`, empty otherwise
    #[must_use]
    pub fn id_tku(&self) -> String {
        match (&self.npwp_15, self.is_company_npwp()) {
            (Some(npwp), true) => format!("0{npwp}000000"),
            _ => String::new(),
        }
    }

    /// NIK for KTP; NPWP-16, falling back to NIK, for NPWP
    #[must_use]
    pub fn primary_id(&self) -> Option<&str> {
        match self.document_type {
            DocumentType::Ktp => self.nik.as_deref(),
            DocumentType::Npwp => self.npwp_16.as_deref().or(self.nik.as_deref()),
        }
    }

    /// Human label, e.g. `NPWP Perusahaan`
    #[must_use]
    pub fn display_name(&self) -> String {
        match (self.document_type, self.npwp_type) {
            (DocumentType::Npwp, Some(kind)) => format!("NPWP {}", kind.label()),
            (kind, _) => kind.as_str().to_string(),
        }
    }

    /// Current value of an editable field
    #[must_use]
    pub fn field(&self, field: EditableField) -> Option<&str> {
        match field {
            EditableField::DocumentType => Some(self.document_type.as_str()),
            EditableField::Nama => Some(self.nama.as_str()).filter(|v| !v.is_empty()),
            EditableField::Alamat => self.alamat.as_deref(),
            EditableField::Nik => self.nik.as_deref(),
            EditableField::Npwp15 => self.npwp_15.as_deref(),
            EditableField::Npwp16 => self.npwp_16.as_deref(),
        }
    }

    /// Overwrites a field with user input. Returns `false` if the value
    /// cannot be stored (unknown document type).
    pub fn set_field(&mut self, field: EditableField, value: &str) -> bool {
        match field {
            EditableField::DocumentType => {
                let Some(kind) = DocumentType::parse(value) else {
                    return false;
                };
                self.document_type = kind;
                if kind == DocumentType::Ktp {
                    self.npwp_type = None;
                }
            }
            EditableField::Nama => self.nama = value.trim().to_string(),
            EditableField::Alamat => self.alamat = clean_text(Some(value)),
            EditableField::Nik => self.nik = clean_number(Some(value)),
            EditableField::Npwp15 => self.npwp_15 = clean_number(Some(value)),
            EditableField::Npwp16 => self.npwp_16 = clean_number(Some(value)),
        }
        true
    }

    /// Sheet row for columns A..J
    #[must_use]
    pub fn to_sheet_row(&self, nama_toko: &str) -> Vec<String> {
        let (jenis_id_pembeli, nomor_dokumen_pembeli) = if self.is_company_npwp() {
            ("TIN", "-")
        } else {
            ("", "")
        };

        vec![
            self.document_type.as_str().to_string(),
            nama_toko.to_string(),
            String::new(),
            jenis_id_pembeli.to_string(),
            nomor_dokumen_pembeli.to_string(),
            self.npwp_15.clone().unwrap_or_default(),
            self.primary_id().unwrap_or_default().to_string(),
            self.id_tku(),
            self.nama.clone(),
            self.alamat.clone().unwrap_or_default(),
        ]
    }

    /// Values looked up in columns F/G/H before saving
    #[must_use]
    pub fn duplicate_check_values(&self) -> Vec<String> {
        let mut values = Vec::new();
        if let Some(npwp) = &self.npwp_15 {
            values.push(npwp.clone());
        }
        if let Some(id) = self.primary_id() {
            values.push(id.to_string());
        }
        let id_tku = self.id_tku();
        if !id_tku.is_empty() {
            values.push(id_tku);
        }
        values.retain(|v| !v.is_empty());
        values.dedup();
        values
    }

    /// Labels of required fields that are still empty
    #[must_use]
    pub fn missing_required_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.nama.trim().is_empty() {
            missing.push("nama");
        }
        match self.document_type {
            DocumentType::Ktp if self.nik.is_none() => missing.push("nik"),
            DocumentType::Npwp if self.npwp_15.is_none() => missing.push("npwp_15"),
            _ => {}
        }
        missing
    }
}

fn clean_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn clean_number(value: Option<&str>) -> Option<String> {
    value.map(digits_only).filter(|v| !v.is_empty())
}

/// `xx.xxx.xxx.x-xxx.xxx`; other lengths pass through
#[must_use]
pub fn format_npwp_15(npwp: &str) -> String {
    if npwp.len() != 15 || !npwp.chars().all(|c| c.is_ascii_digit()) {
        return npwp.to_string();
    }
    format!(
        "{}.{}.{}.{}-{}.{}",
        &npwp[0..2],
        &npwp[2..5],
        &npwp[5..8],
        &npwp[8..9],
        &npwp[9..12],
        &npwp[12..15]
    )
}

/// `xxxx xxxx xxxx xxxx`; other lengths pass through
#[must_use]
pub fn format_id_16(id: &str) -> String {
    if id.len() != 16 || !id.chars().all(|c| c.is_ascii_digit()) {
        return id.to_string();
    }
    format!("{} {} {} {}", &id[0..4], &id[4..8], &id[8..12], &id[12..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn company_npwp() -> DocumentData {
        let mut doc = DocumentData::new(
            DocumentType::Npwp,
            "  PT MAJU JAYA  ",
            Some("Jl. Sudirman No. 1 RT 01 RW 02 Kec. Tegalsari"),
            None,
            Some("01.234.567.8-901.000"),
            None,
        );
        doc.npwp_type = Some(NpwpType::Company);
        doc
    }

    #[test]
    fn test_new_cleans_fields() {
        let doc = company_npwp();
        assert_eq!(doc.nama, "PT MAJU JAYA");
        assert_eq!(doc.npwp_15.as_deref(), Some("012345678901000"));
        assert_eq!(doc.nik, None);

        let blank = DocumentData::new(DocumentType::Ktp, "A", Some("   "), Some("-"), None, None);
        assert_eq!(blank.alamat, None);
        assert_eq!(blank.nik, None);
    }

    #[test]
    fn test_company_row_layout() {
        let doc = company_npwp();
        let row = doc.to_sheet_row("Toko Sinar");

        assert_eq!(row.len(), 10);
        assert_eq!(row[0], "NPWP");
        assert_eq!(row[1], "Toko Sinar");
        assert_eq!(row[2], "");
        assert_eq!(row[3], "TIN");
        assert_eq!(row[4], "-");
        assert_eq!(row[5], "012345678901000");
        assert_eq!(row[6], "");
        assert_eq!(row[7], "0012345678901000000000");
        assert_eq!(row[8], "PT MAJU JAYA");
    }

    #[test]
    fn test_personal_npwp_has_no_id_tku() {
        let mut doc = company_npwp();
        doc.npwp_type = Some(NpwpType::Personal);
        doc.npwp_16 = Some("0123456789010000".to_string());

        assert_eq!(doc.id_tku(), "");
        assert_eq!(doc.primary_id(), Some("0123456789010000"));
        assert_eq!(doc.display_name(), "NPWP Orang Pribadi");
        let row = doc.to_sheet_row("");
        assert_eq!(row[3], "");
        assert_eq!(row[4], "");
    }

    #[test]
    fn test_ktp_primary_id_and_duplicates() {
        let doc = DocumentData::new(
            DocumentType::Ktp,
            "BUDI",
            None,
            Some("3201 2345 6789 0001"),
            None,
            None,
        );
        assert_eq!(doc.primary_id(), Some("3201234567890001"));
        assert_eq!(doc.display_name(), "KTP");
        assert_eq!(doc.duplicate_check_values(), vec!["3201234567890001"]);

        let company = company_npwp();
        assert_eq!(
            company.duplicate_check_values(),
            vec!["012345678901000", "0012345678901000000000"]
        );
    }

    #[test]
    fn test_npwp_primary_id_falls_back_to_nik() {
        let mut doc = company_npwp();
        doc.nik = Some("3201234567890001".to_string());
        assert_eq!(doc.primary_id(), Some("3201234567890001"));
    }

    #[test]
    fn test_missing_required_fields() {
        let ktp = DocumentData::new(DocumentType::Ktp, " ", None, None, None, None);
        assert_eq!(ktp.missing_required_fields(), vec!["nama", "nik"]);

        assert!(company_npwp().missing_required_fields().is_empty());
    }

    #[test]
    fn test_set_field() {
        let mut doc = company_npwp();
        assert!(doc.set_field(EditableField::Npwp16, "0123.4567.8901.0000"));
        assert_eq!(doc.npwp_16.as_deref(), Some("0123456789010000"));

        assert!(!doc.set_field(EditableField::DocumentType, "SIM"));
        assert!(doc.set_field(EditableField::DocumentType, " ktp "));
        assert_eq!(doc.document_type, DocumentType::Ktp);
        assert_eq!(doc.npwp_type, None);
    }

    #[test]
    fn test_editable_field_keys_round_trip() {
        for field in EditableField::ALL {
            assert_eq!(EditableField::from_key(field.key()), Some(field));
        }
        assert_eq!(EditableField::from_key("location"), None);
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_npwp_15("012345678901000"), "01.234.567.8-901.000");
        assert_eq!(format_npwp_15("12345"), "12345");
        assert_eq!(format_id_16("3201234567890001"), "3201 2345 6789 0001");
        assert_eq!(format_id_16("320123"), "320123");
    }
}
