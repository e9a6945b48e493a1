//! Save pipeline: duplicate check, sheet append and Drive upload.

use super::auth::TokenSource;
use super::drive::DriveApi;
use super::sheets::SheetsApi;
use super::GoogleError;
use crate::config::{
    Settings, FOLDER_CACHE_MAX_SIZE, FOLDER_CACHE_TTL_SECS, PDF_SUBFOLDER, PHOTO_SUBFOLDER,
};
use crate::document::DocumentData;
use crate::utils::{mask_sensitive, sanitize_filename, split_extension};
use moka::future::Cache;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Sheet columns holding NPWP-15, NIK/NPWP-16 and ID TKU
const DUPLICATE_COLUMNS: [&str; 3] = ["F", "G", "H"];

/// Result of saving a confirmed document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Row appended and photo archived
    Saved {
        /// Sheet tab that received the row
        sheet: String,
        /// Name of the archived photo
        file_name: String,
    },
    /// An id already exists in the sheet; nothing was written
    Duplicate,
}

/// Google side status for `/status` and startup checks
#[derive(Debug, Clone, Default)]
pub struct ServiceHealth {
    /// Token refresh result
    pub authentication: String,
    /// Drive reachability
    pub drive: String,
    /// Sheets reachability
    pub sheets: String,
    /// Spreadsheet title when reachable
    pub spreadsheet_title: Option<String>,
    /// Accessibility per branch folder
    pub folders: Vec<(String, String)>,
}

impl ServiceHealth {
    /// All checks passed
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.authentication == "healthy"
            && self.drive == "healthy"
            && self.sheets == "healthy"
            && self.folders.iter().all(|(_, status)| status == "accessible")
    }

    /// Multi-line plain text summary
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Auth: {}\nDrive: {}\nSheets: {}",
            self.authentication, self.drive, self.sheets
        );
        if let Some(title) = &self.spreadsheet_title {
            let _ = write!(out, " ({title})");
        }
        for (branch, status) in &self.folders {
            let _ = write!(out, "\n  {branch}: {status}");
        }
        out
    }
}

/// Photo name in the archive: `<nama> - <TYPE>.jpg`
#[must_use]
pub fn photo_file_name(document: &DocumentData) -> String {
    sanitize_filename(&format!(
        "{} - {}.jpg",
        document.nama,
        document.document_type.as_str()
    ))
}

/// PDF name in the archive: custom name (or the original stem) plus the
/// original extension, `.pdf` when there is none
#[must_use]
pub fn pdf_file_name(custom_name: Option<&str>, original_filename: &str) -> String {
    let (stem, ext) = split_extension(original_filename);
    let name = custom_name.map(str::trim).filter(|n| !n.is_empty()).unwrap_or(stem);
    let ext = if ext.is_empty() { ".pdf" } else { ext };
    sanitize_filename(&format!("{name}{ext}"))
}

/// Writes confirmed records to Sheets and archives files in Drive
pub struct ArchiveService {
    settings: Arc<Settings>,
    sheets: Arc<dyn SheetsApi>,
    drive: Arc<dyn DriveApi>,
    tokens: Arc<dyn TokenSource>,
    folder_cache: Cache<String, String>,
}

impl ArchiveService {
    /// Create the archive service
    #[must_use]
    pub fn new(
        settings: Arc<Settings>,
        sheets: Arc<dyn SheetsApi>,
        drive: Arc<dyn DriveApi>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        let folder_cache = Cache::builder()
            .max_capacity(FOLDER_CACHE_MAX_SIZE)
            .time_to_live(Duration::from_secs(FOLDER_CACHE_TTL_SECS))
            .build();

        Self {
            settings,
            sheets,
            drive,
            tokens,
            folder_cache,
        }
    }

    fn branch_target(&self, branch: &str) -> Result<(&str, &str), GoogleError> {
        match (
            self.settings.branch_folder(branch),
            self.settings.branch_sheet(branch),
        ) {
            (Some(folder), Some(sheet)) => Ok((folder, sheet)),
            _ => Err(GoogleError::InvalidBranch(branch.to_string())),
        }
    }

    /// Saves a confirmed document: row first, then the photo.
    ///
    /// The duplicate check runs unless `bypass_duplicates` is set or the
    /// check is disabled. A lookup that fails in transport counts as
    /// "no duplicate"; any error returned by the API stops the save.
    ///
    /// # Errors
    ///
    /// Returns `GoogleError::InvalidBranch` for unknown branches, or the
    /// Sheets/Drive error that stopped the save.
    #[instrument(skip(self, document, image), fields(doc_type = %document.document_type))]
    pub async fn save_document(
        &self,
        branch: &str,
        document: &DocumentData,
        nama_toko: &str,
        image: Vec<u8>,
        bypass_duplicates: bool,
    ) -> Result<SaveOutcome, GoogleError> {
        let (folder_id, sheet) = self.branch_target(branch)?;

        if self.settings.enable_duplicate_check
            && !bypass_duplicates
            && self.is_duplicate(sheet, document).await?
        {
            return Ok(SaveOutcome::Duplicate);
        }

        self.sheets
            .append_row(sheet, document.to_sheet_row(nama_toko))
            .await?;

        let target = self.ensure_folder(folder_id, PHOTO_SUBFOLDER).await?;
        let file_name = photo_file_name(document);
        self.drive
            .upload_file(&target, &file_name, "image/jpeg", image)
            .await
            .inspect_err(|e| error!("Row saved to {sheet} but photo upload failed: {e}"))?;

        info!("Successfully saved document for {}", document.nama);
        Ok(SaveOutcome::Saved {
            sheet: sheet.to_string(),
            file_name,
        })
    }

    /// Uploads a PDF to `<branch folder>/PDF`; returns the stored file name
    ///
    /// # Errors
    ///
    /// Returns `GoogleError::InvalidBranch` for unknown branches or the Drive error.
    #[instrument(skip(self, content), fields(size = content.len()))]
    pub async fn save_pdf(
        &self,
        branch: &str,
        custom_name: Option<&str>,
        original_filename: &str,
        content: Vec<u8>,
    ) -> Result<String, GoogleError> {
        let (folder_id, _) = self.branch_target(branch)?;
        let target = self.ensure_folder(folder_id, PDF_SUBFOLDER).await?;
        let file_name = pdf_file_name(custom_name, original_filename);

        self.drive
            .upload_file(&target, &file_name, "application/pdf", content)
            .await?;
        info!("Saved PDF {file_name} for branch {branch}");
        Ok(file_name)
    }

    async fn is_duplicate(&self, sheet: &str, document: &DocumentData) -> Result<bool, GoogleError> {
        let values = document.duplicate_check_values();
        if values.is_empty() {
            return Ok(false);
        }

        let columns = DUPLICATE_COLUMNS.iter().map(ToString::to_string).collect();
        match self.sheets.column_values(sheet, columns).await {
            Ok(columns) => {
                let found = columns
                    .iter()
                    .flatten()
                    .map(|cell| cell.trim())
                    .find(|cell| values.iter().any(|v| v == cell));
                if let Some(cell) = found {
                    warn!("Duplicate found: {}", mask_sensitive(cell, 4, 4));
                }
                Ok(found.is_some())
            }
            // Transport failures are not answers from the API
            Err(GoogleError::NetworkError(e)) => {
                error!("Error checking duplicates: {e}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Id of `name` under `parent_id`, created if missing
    async fn ensure_folder(&self, parent_id: &str, name: &str) -> Result<String, GoogleError> {
        let cache_key = format!("{parent_id}:{name}");
        if let Some(id) = self.folder_cache.get(&cache_key).await {
            return Ok(id);
        }

        let id = match self.drive.find_folder(parent_id, name).await? {
            Some(id) => {
                info!("Found existing folder: {name}");
                id
            }
            None => self.drive.create_folder(parent_id, name).await?,
        };

        self.folder_cache.insert(cache_key, id.clone()).await;
        Ok(id)
    }

    /// Checks authentication, Drive, the spreadsheet and every branch folder
    pub async fn health(&self) -> ServiceHealth {
        let mut health = ServiceHealth::default();

        if let Err(e) = self.tokens.access_token().await {
            health.authentication = format!("error: {e}");
            return health;
        }
        health.authentication = "healthy".to_string();

        health.drive = match self.drive.ping().await {
            Ok(()) => "healthy".to_string(),
            Err(e) => format!("error: {e}"),
        };

        match self.sheets.spreadsheet_title().await {
            Ok(title) => {
                health.sheets = "healthy".to_string();
                health.spreadsheet_title = Some(title);
            }
            Err(e) => health.sheets = format!("error: {e}"),
        }

        for branch in self.settings.branches() {
            let Some(folder_id) = self.settings.branch_folder(&branch) else {
                continue;
            };
            let status = match self.drive.get_file(folder_id).await {
                Ok(_) => "accessible".to_string(),
                Err(e) => format!("error: {e}"),
            };
            health.folders.push((branch, status));
        }

        health
    }

    /// Parent folder metadata and subfolders of a branch
    ///
    /// # Errors
    ///
    /// Returns `GoogleError::InvalidBranch` or the Drive error.
    pub async fn folder_info(
        &self,
        branch: &str,
    ) -> Result<(super::DriveFile, Vec<super::DriveFile>), GoogleError> {
        let (folder_id, _) = self.branch_target(branch)?;
        let parent = self.drive.get_file(folder_id).await?;
        let subfolders = self.drive.list_subfolders(folder_id).await?;
        Ok((parent, subfolders))
    }

    /// Sheet tab information of a branch
    ///
    /// # Errors
    ///
    /// Returns `GoogleError::InvalidBranch` or the Sheets error.
    pub async fn sheet_info(&self, branch: &str) -> Result<super::SheetInfo, GoogleError> {
        let (_, sheet) = self.branch_target(branch)?;
        self.sheets.sheet_info(sheet).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentType, NpwpType};
    use crate::google::auth::MockTokenSource;
    use crate::google::drive::MockDriveApi;
    use crate::google::sheets::MockSheetsApi;
    use crate::google::{DriveFile, SheetInfo};
    use mockall::predicate::eq;

    fn service(sheets: MockSheetsApi, drive: MockDriveApi) -> ArchiveService {
        let mut tokens = MockTokenSource::new();
        tokens
            .expect_access_token()
            .returning(|| Ok("ya29.test".to_string()));
        ArchiveService::new(
            Arc::new(crate::config::test_settings()),
            Arc::new(sheets),
            Arc::new(drive),
            Arc::new(tokens),
        )
    }

    fn ktp() -> DocumentData {
        DocumentData::new(
            DocumentType::Ktp,
            "BUDI SANTOSO",
            Some("Jl. Merdeka No. 1"),
            Some("3201012345670001"),
            None,
            None,
        )
    }

    fn drive_with_folder() -> MockDriveApi {
        let mut drive = MockDriveApi::new();
        drive
            .expect_find_folder()
            .returning(|_, _| Ok(Some("sub-folder".to_string())));
        drive
    }

    #[tokio::test]
    async fn test_save_document_appends_then_uploads() {
        let mut sheets = MockSheetsApi::new();
        sheets
            .expect_column_values()
            .times(1)
            .returning(|_, _| Ok(vec![vec!["NIK".to_string()], vec![], vec![]]));
        sheets
            .expect_append_row()
            .withf(|sheet, row| sheet == "NPWPKTP BJ (NEW)" && row[1] == "Toko Maju")
            .times(1)
            .returning(|_, _| Ok(10));

        let mut drive = drive_with_folder();
        drive
            .expect_upload_file()
            .withf(|folder, name, mime, _| {
                folder == "sub-folder" && name == "BUDI SANTOSO - KTP.jpg" && mime == "image/jpeg"
            })
            .times(1)
            .returning(|_, _, _, _| Ok("file-1".to_string()));

        let outcome = service(sheets, drive)
            .save_document("BJ", &ktp(), "Toko Maju", vec![1, 2, 3], false)
            .await
            .expect("save should succeed");

        assert_eq!(
            outcome,
            SaveOutcome::Saved {
                sheet: "NPWPKTP BJ (NEW)".to_string(),
                file_name: "BUDI SANTOSO - KTP.jpg".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_duplicate_stops_save() {
        let mut sheets = MockSheetsApi::new();
        sheets.expect_column_values().returning(|_, _| {
            Ok(vec![
                vec![],
                vec![" 3201012345670001 ".to_string()],
                vec![],
            ])
        });
        sheets.expect_append_row().never();
        let mut drive = MockDriveApi::new();
        drive.expect_upload_file().never();

        let outcome = service(sheets, drive)
            .save_document("BJ", &ktp(), "", vec![], false)
            .await
            .expect("duplicate is not an error");
        assert_eq!(outcome, SaveOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_bypass_skips_duplicate_check() {
        let mut sheets = MockSheetsApi::new();
        sheets.expect_column_values().never();
        sheets.expect_append_row().returning(|_, _| Ok(10));
        let mut drive = drive_with_folder();
        drive
            .expect_upload_file()
            .returning(|_, _, _, _| Ok("file-1".to_string()));

        let outcome = service(sheets, drive)
            .save_document("BJ", &ktp(), "", vec![], true)
            .await
            .expect("save should succeed");
        assert!(matches!(outcome, SaveOutcome::Saved { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_lookup_failures() {
        let mut sheets = MockSheetsApi::new();
        sheets
            .expect_column_values()
            .returning(|_, _| Err(GoogleError::NetworkError("timeout".to_string())));
        sheets.expect_append_row().returning(|_, _| Ok(10));
        let mut drive = drive_with_folder();
        drive
            .expect_upload_file()
            .returning(|_, _, _, _| Ok("file-1".to_string()));

        let saved = service(sheets, drive)
            .save_document("BJ", &ktp(), "", vec![], false)
            .await;
        assert!(matches!(saved, Ok(SaveOutcome::Saved { .. })));

        let mut sheets = MockSheetsApi::new();
        sheets
            .expect_column_values()
            .returning(|_, _| Err(GoogleError::NotFound("sheet".to_string())));
        sheets.expect_append_row().never();

        let missing = service(sheets, MockDriveApi::new())
            .save_document("BJ", &ktp(), "", vec![], false)
            .await;
        assert!(matches!(missing, Err(GoogleError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_lookup_api_errors_abort_save() {
        let failures: [fn() -> GoogleError; 3] = [
            || GoogleError::PermissionDenied("403".to_string()),
            || GoogleError::ApiError {
                status: 400,
                message: "Unable to parse range".to_string(),
            },
            || GoogleError::AuthError("invalid_grant".to_string()),
        ];

        for failure in failures {
            let mut sheets = MockSheetsApi::new();
            sheets
                .expect_column_values()
                .returning(move |_, _| Err(failure()));
            sheets.expect_append_row().never();
            let mut drive = MockDriveApi::new();
            drive.expect_upload_file().never();

            let result = service(sheets, drive)
                .save_document("BJ", &ktp(), "", vec![], false)
                .await;
            assert!(result.is_err(), "save must stop on {}", failure());
        }
    }

    #[tokio::test]
    async fn test_invalid_branch() {
        let result = service(MockSheetsApi::new(), MockDriveApi::new())
            .save_document("XYZ", &ktp(), "", vec![], false)
            .await;
        assert!(matches!(result, Err(GoogleError::InvalidBranch(_))));
    }

    #[tokio::test]
    async fn test_branch_folder_and_sheet_info() {
        let mut drive = MockDriveApi::new();
        drive.expect_get_file().times(1).returning(|id| {
            Ok(DriveFile {
                id: id.to_string(),
                name: "BJ".to_string(),
                created_time: None,
                modified_time: None,
            })
        });
        drive.expect_list_subfolders().times(1).returning(|parent| {
            Ok(["PDF", "Sudah diinput"]
                .iter()
                .map(|name| DriveFile {
                    id: format!("{parent}-{name}"),
                    name: (*name).to_string(),
                    created_time: None,
                    modified_time: None,
                })
                .collect())
        });
        let mut sheets = MockSheetsApi::new();
        sheets
            .expect_sheet_info()
            .with(eq("NPWPKTP BJ (NEW)"))
            .times(1)
            .returning(|sheet| {
                Ok(SheetInfo {
                    sheet_id: 7,
                    title: sheet.to_string(),
                    row_count: 42,
                    column_count: 26,
                    hidden: false,
                })
            });

        let archive = service(sheets, drive);
        let (parent, subfolders) = archive.folder_info("BJ").await.expect("folder info");
        assert_eq!(parent.name, "BJ");
        let names: Vec<_> = subfolders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["PDF", "Sudah diinput"]);

        let info = archive.sheet_info("BJ").await.expect("sheet info");
        assert_eq!(info.row_count, 42);
        assert!(matches!(
            archive.folder_info("XYZ").await,
            Err(GoogleError::InvalidBranch(_))
        ));
    }

    #[tokio::test]
    async fn test_folder_created_once_and_cached() {
        let mut drive = MockDriveApi::new();
        drive
            .expect_find_folder()
            .with(eq("15pjmJNcr2bdxDKBwm6DZmGm4FebQfZ0W"), eq(PDF_SUBFOLDER))
            .times(1)
            .returning(|_, _| Ok(None));
        drive
            .expect_create_folder()
            .times(1)
            .returning(|_, _| Ok("pdf-folder".to_string()));
        drive
            .expect_upload_file()
            .withf(|folder, name, mime, _| {
                folder == "pdf-folder" && name.ends_with(".pdf") && mime == "application/pdf"
            })
            .times(2)
            .returning(|_, _, _, _| Ok("file".to_string()));

        let archive = service(MockSheetsApi::new(), drive);
        let first = archive
            .save_pdf("SBY", Some("Faktur Maret"), "scan.pdf", vec![1])
            .await
            .expect("first upload");
        let second = archive
            .save_pdf("SBY", None, "laporan.final.pdf", vec![2])
            .await
            .expect("second upload");

        assert_eq!(first, "Faktur Maret.pdf");
        assert_eq!(second, "laporan.final.pdf");
    }

    #[tokio::test]
    async fn test_company_npwp_duplicate_values() {
        let mut doc = DocumentData::new(
            DocumentType::Npwp,
            "PT MAJU",
            None,
            None,
            Some("866555295602000"),
            None,
        );
        doc.npwp_type = Some(NpwpType::Company);

        let mut sheets = MockSheetsApi::new();
        sheets.expect_column_values().returning(|_, _| {
            Ok(vec![vec![], vec![], vec!["0866555295602000000000".to_string()]])
        });

        let outcome = service(sheets, MockDriveApi::new())
            .save_document("BJ", &doc, "", vec![], false)
            .await
            .expect("duplicate check");
        assert_eq!(outcome, SaveOutcome::Duplicate);
    }

    #[test]
    fn test_file_names() {
        assert_eq!(pdf_file_name(Some("  "), "scan"), "scan.pdf");
        assert_eq!(pdf_file_name(Some("A/B"), "x.PDF"), "A_B.PDF");
        assert_eq!(photo_file_name(&ktp()), "BUDI SANTOSO - KTP.jpg");
    }

    #[tokio::test]
    async fn test_health_stops_on_auth_failure() {
        let mut tokens = MockTokenSource::new();
        tokens
            .expect_access_token()
            .returning(|| Err(GoogleError::AuthError("invalid_grant".to_string())));
        let mut drive = MockDriveApi::new();
        drive.expect_ping().never();

        let archive = ArchiveService::new(
            Arc::new(crate::config::test_settings()),
            Arc::new(MockSheetsApi::new()),
            Arc::new(drive),
            Arc::new(tokens),
        );
        let health = archive.health().await;
        assert!(health.authentication.starts_with("error"));
        assert!(!health.is_healthy());
    }
}
