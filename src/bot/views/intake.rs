//! Intake workflow UI components
//!
//! Contains keyboards, text messages, and the data preview for the
//! photo/PDF intake flow. All texts are HTML (`ParseMode::Html`).

use crate::config::Settings;
use crate::document::{format_id_16, format_npwp_15, DocumentData, DocumentType, EditableField};
use crate::google::{DriveFile, GoogleError, SheetInfo};
use crate::llm::AiError;
use crate::session::{SessionError, SessionState, SessionStats, UserSession, WorkflowType};
use crate::utils::{truncate_str, truncate_with_ellipsis};
use crate::validators::ValidationError;
use chrono::{DateTime, Utc};
use html_escape::encode_text;
use std::fmt::Write as _;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

// ─────────────────────────────────────────────────────────────────────────────
// Callback constants
// ─────────────────────────────────────────────────────────────────────────────

/// Prefix of branch buttons (`branch_SBY`)
pub const CB_BRANCH_PREFIX: &str = "branch_";
/// Prefix of NPWP type buttons (`npwptype_company`)
pub const CB_NPWP_TYPE_PREFIX: &str = "npwptype_";
/// Prefix of field edit buttons (`edit_nama`)
pub const CB_EDIT_PREFIX: &str = "edit_";
/// Save after preview
pub const CB_CONFIRM_SAVE: &str = "confirm_save";
/// Save ignoring the duplicate warning
pub const CB_FORCE_SAVE: &str = "force_save";
/// Open the edit menu
pub const CB_CONFIRM_EDIT: &str = "confirm_edit";
/// Choose another branch from the edit menu
pub const CB_EDIT_LOCATION: &str = "edit_location";
/// Back from the edit menu to the preview
pub const CB_CANCEL_EDIT: &str = "cancel_edit";
/// Abort the whole operation
pub const CB_CANCEL_OP: &str = "cancel_op";

/// Longest address shown in the preview
const PREVIEW_ADDRESS_LIMIT: usize = 200;

/// Longest uploaded file name shown back to the user
const FILE_NAME_DISPLAY_LIMIT: usize = 60;

const SEPARATOR: &str = "━━━━━━━━━━━━━━━━━━━━";

// ─────────────────────────────────────────────────────────────────────────────
// Static messages
// ─────────────────────────────────────────────────────────────────────────────

/// Photo received, AI extraction started
pub const PROCESSING_AI: &str = "🧠 Memproses gambar dengan AI...";
/// NPWP detected, ask company or personal
pub const ASK_NPWP_TYPE: &str = "🏢 NPWP terdeteksi. Tentukan jenisnya:";
/// Ask for the PDF file name
pub const ASK_PDF_NAME: &str = "📝 Silakan ketik nama lengkap untuk file PDF ini:";
/// Save in progress
pub const SAVING: &str = "💾 Menyimpan data...";
/// Forced save in progress
pub const SAVING_FORCED: &str = "💾 Menyimpan data (mengabaikan duplikat)...";
/// Edit menu header
pub const EDIT_MENU: &str = "📝 Pilih data yang ingin diubah:";
/// Branch keyboard header when changing location
pub const ASK_NEW_LOCATION: &str = "📍 Silakan pilih lokasi penyimpanan yang baru:";
/// Operation cancelled from a button
pub const OPERATION_CANCELLED: &str =
    "❌ Operasi dibatalkan.\n\nSilakan kirim foto atau file baru untuk memulai ulang.";
/// Unknown callback data
pub const UNKNOWN_ACTION: &str = "❌ Aksi tidak dikenali. Silakan mulai ulang dengan /start";
/// Button pressed from an earlier step
pub const STALE_BUTTON: &str = "⚠️ Tombol ini sudah tidak berlaku. Gunakan pesan terbaru.";
/// Branch selected on a session without a workflow
pub const UNKNOWN_WORKFLOW: &str = "❌ Workflow tidak dikenali. Silakan mulai ulang.";
/// Preview could not be built from the session
pub const PREVIEW_ERROR: &str = "❌ Terjadi kesalahan saat memproses data.";
/// Duplicate id found in the sheet
pub const DUPLICATE_WARNING: &str =
    "⚠️ <b>PERINGATAN: Data Duplikat</b>\n\nNIK/NPWP ini sudah ada di database. Tetap simpan?";
/// Text received while no field is being edited
pub const NO_EDIT_FIELD: &str = "❌ Tidak ada field yang sedang diedit. Silakan mulai ulang.";
/// `/cancel` without a session
pub const NOTHING_TO_CANCEL: &str = "❌ Tidak ada operasi yang sedang berjalan untuk dibatalkan.";
/// Admin command from a regular user
pub const NOT_ADMIN: &str = "❌ Anda tidak memiliki akses untuk perintah ini.";
/// PDF name shorter than two characters
pub const PDF_NAME_TOO_SHORT: &str = "❌ Nama file terlalu pendek. Masukkan minimal 2 karakter.";
/// PDF name longer than a hundred characters
pub const PDF_NAME_TOO_LONG: &str = "❌ Nama file terlalu panjang. Maksimal 100 karakter.";
/// PDF name accepted
pub const PDF_NAME_ACCEPTED: &str = "✅ Nama file diatur. Menyimpan ke Google Drive...";
/// Document upload that is not a PDF
pub const INVALID_FILE_TYPE: &str = "❌ Tipe file tidak didukung. Gunakan gambar (JPG/PNG) atau PDF.";
/// AI failed to read the image
pub const AI_FAILED: &str =
    "❌ AI tidak dapat memproses gambar. Pastikan gambar jelas dan berisi KTP/NPWP.";
/// Google API failure
pub const GOOGLE_FAILED: &str = "❌ Terjadi masalah dengan layanan Google. Coba lagi nanti.";
/// Branch code not configured
pub const INVALID_BRANCH: &str = "❌ Cabang tidak valid. Pilih dari daftar yang tersedia.";
/// Session timed out or missing
pub const SESSION_EXPIRED: &str = "⏰ Sesi sudah berakhir. Silakan mulai ulang dengan /start";
/// AI provider rate limit
pub const RATE_LIMITED: &str = "⏳ Terlalu banyak permintaan. Silakan tunggu sebentar.";
/// Anything else
pub const GENERIC_ERROR: &str = "❌ Terjadi kesalahan tidak terduga. Silakan coba lagi.";

/// Text received with no session
pub const NO_SESSION_GUIDANCE: &str = "🤔 <b>Tidak ada operasi yang sedang berjalan.</b>\n\n\
Untuk memulai, silakan:\n\
📸 Kirim foto KTP/NPWP, atau\n\
📄 Kirim file PDF\n\n\
💡 Gunakan /help untuk bantuan lengkap.";

/// Stickers, voice, locations and the like
pub const UNSUPPORTED_MESSAGE: &str = "❌ <b>Tipe pesan tidak didukung</b>\n\n\
Bot ini hanya menerima:\n\
📸 Foto (JPG/PNG) untuk KTP/NPWP\n\
📄 File PDF untuk arsip\n\
💬 Pesan teks untuk input data\n\n\
Silakan kirim foto atau PDF untuk memulai.";

// ─────────────────────────────────────────────────────────────────────────────
// Keyboards
// ─────────────────────────────────────────────────────────────────────────────

/// Branch buttons, sorted, two per row
#[must_use]
pub fn branch_keyboard(branches: &[String]) -> InlineKeyboardMarkup {
    let mut sorted: Vec<&String> = branches.iter().collect();
    sorted.sort();

    let rows = sorted
        .chunks(2)
        .map(|chunk| {
            chunk
                .iter()
                .map(|code| {
                    InlineKeyboardButton::callback(
                        format!("🏢 {code}"),
                        format!("{CB_BRANCH_PREFIX}{code}"),
                    )
                })
                .collect()
        })
        .collect::<Vec<Vec<_>>>();
    InlineKeyboardMarkup::new(rows)
}

/// Company or personal NPWP
#[must_use]
pub fn npwp_type_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("🏢 Perusahaan", format!("{CB_NPWP_TYPE_PREFIX}company")),
        InlineKeyboardButton::callback("👤 Orang Pribadi", format!("{CB_NPWP_TYPE_PREFIX}personal")),
    ]])
}

/// Save / edit / cancel under the preview
#[must_use]
pub fn confirmation_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            InlineKeyboardButton::callback("✅ Simpan", CB_CONFIRM_SAVE),
            InlineKeyboardButton::callback("✏️ Edit", CB_CONFIRM_EDIT),
        ],
        vec![InlineKeyboardButton::callback("❌ Batal", CB_CANCEL_OP)],
    ])
}

/// Continue or abort after a duplicate warning
#[must_use]
pub fn duplicate_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("✅ Lanjut Simpan", CB_FORCE_SAVE),
        InlineKeyboardButton::callback("❌ Batal", CB_CANCEL_OP),
    ]])
}

/// Button caption of an editable field
#[must_use]
pub const fn field_button_label(field: EditableField) -> &'static str {
    match field {
        EditableField::DocumentType => "📇 Tipe Dokumen",
        EditableField::Nama => "👤 Nama",
        EditableField::Alamat => "🏠 Alamat",
        EditableField::Nik => "🔢 NIK",
        EditableField::Npwp15 => "🔢 NPWP 15",
        EditableField::Npwp16 => "🔢 NPWP 16",
    }
}

/// One button per field that has a value, then location and back
#[must_use]
pub fn edit_keyboard(document: &DocumentData) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = EditableField::ALL
        .into_iter()
        .filter(|field| document.field(*field).is_some())
        .map(|field| {
            vec![InlineKeyboardButton::callback(
                format!("Ubah: {}", field_button_label(field)),
                format!("{CB_EDIT_PREFIX}{}", field.key()),
            )]
        })
        .collect();

    rows.push(vec![InlineKeyboardButton::callback(
        "📍 Ubah Lokasi Simpan",
        CB_EDIT_LOCATION,
    )]);
    rows.push(vec![InlineKeyboardButton::callback("🔙 Kembali", CB_CANCEL_EDIT)]);
    InlineKeyboardMarkup::new(rows)
}

// ─────────────────────────────────────────────────────────────────────────────
// Command texts
// ─────────────────────────────────────────────────────────────────────────────

/// `/start` greeting
#[must_use]
pub fn welcome_message(user_name: &str) -> String {
    format!(
        "🤖 Halo {}! Selamat datang di Bot KTP/NPWP Assistant.\n\n\
<b>📋 Apa yang bisa saya lakukan:</b>\n\
• Memproses foto KTP dan NPWP dengan AI\n\
• Menyimpan data ke Google Sheets otomatis\n\
• Mengarsipkan file ke Google Drive\n\
• Menangani file PDF\n\n\
<b>📤 Cara menggunakan:</b>\n\
1. Kirim foto KTP/NPWP (bisa dengan caption nama toko)\n\
2. Atau kirim file PDF untuk diarsipkan\n\
3. Pilih cabang tujuan\n\
4. Periksa hasil AI dan konfirmasi\n\n\
<b>💡 Tips:</b>\n\
• Pastikan foto jelas dan tidak buram\n\
• Pencahayaan yang baik untuk hasil terbaik\n\
• Gunakan /help untuk bantuan lebih lanjut\n\n\
Silakan kirim foto atau file untuk memulai! 🚀",
        encode_text(user_name)
    )
}

/// `/help` text with the branch list and limits
#[must_use]
pub fn help_message(settings: &Settings) -> String {
    let mut text = String::from(
        "🆘 <b>Bantuan Bot KTP/NPWP Assistant</b>\n\n\
<b>📋 Perintah yang tersedia:</b>\n\
• /start - Memulai bot dan melihat panduan\n\
• /help - Menampilkan bantuan ini\n\
• /status - Cek status sistem\n\
• /cancel - Membatalkan operasi yang sedang berjalan\n\n\
<b>📤 Cara kerja bot:</b>\n\
1. <b>Foto KTP/NPWP</b>: Bot akan memproses dengan AI untuk ekstraksi data\n\
2. <b>File PDF</b>: Bot akan menyimpan ke folder yang sesuai\n\
3. <b>Caption</b>: Jika ada caption, akan disimpan sebagai nama toko\n\n\
<b>🏢 Cabang yang didukung:</b>\n",
    );

    for branch in settings.branches() {
        let _ = writeln!(text, "• {}", encode_text(&branch));
    }

    let _ = write!(
        text,
        "\n<b>⚠️ Persyaratan file:</b>\n\
• Gambar: JPG/PNG, maksimal {}MB\n\
• PDF: Maksimal {}MB\n\
• Foto harus jelas dan terbaca\n\n\
<b>🔒 Keamanan:</b>\n\
• Data diproses secara aman\n\
• File tidak disimpan di server bot\n\
• Sesi otomatis berakhir setelah {} menit\n\n\
<b>❓ Masalah umum:</b>\n\
• Foto buram → Ambil foto ulang dengan pencahayaan baik\n\
• AI tidak bisa baca → Pastikan teks terlihat jelas\n\
• File terlalu besar → Kompres file atau gunakan resolusi lebih kecil\n\n\
Butuh bantuan lebih lanjut? Hubungi admin.",
        settings.max_image_size_mb, settings.max_pdf_size_mb, settings.session_timeout_minutes
    );
    text
}

/// `/status` text
#[must_use]
pub fn status_message(
    settings: &Settings,
    session: Option<&UserSession>,
    now: DateTime<Utc>,
) -> String {
    let session_info = session.map_or_else(
        || "Tidak ada sesi aktif".to_string(),
        |s| s.status_summary(now),
    );

    format!(
        "📊 <b>Status Bot</b>\n\n\
🤖 <b>Bot</b>: Aktif ✅\n\
🧠 <b>AI Service</b>: {}\n\n\
👤 <b>Sesi Anda</b>:\n{session_info}\n\n\
⚙️ <b>Konfigurasi</b>:\n\
• Timeout sesi: {} menit\n\
• Max ukuran gambar: {}MB\n\
• Max ukuran PDF: {}MB\n\
• Cabang tersedia: {}\n\n\
🕐 <b>Waktu server</b>: {}",
        encode_text(&settings.active_ai_service.to_uppercase()),
        settings.session_timeout_minutes,
        settings.max_image_size_mb,
        settings.max_pdf_size_mb,
        settings.branches().len(),
        now.format("%Y-%m-%d %H:%M:%S")
    )
}

/// `/cancel` confirmation
#[must_use]
pub fn cancelled_message(workflow: Option<WorkflowType>, state: SessionState) -> String {
    format!(
        "✅ <b>Operasi dibatalkan</b>\n\n\
📋 Workflow yang dibatalkan: {}\n\
📊 State terakhir: {state}\n\n\
Semua data sesi telah dihapus.\n\
Silakan mulai ulang dengan mengirim foto atau file baru.",
        workflow.map_or("-", WorkflowType::as_str)
    )
}

/// `/admin_stats` text
#[must_use]
pub fn admin_stats_message(settings: &Settings, stats: &SessionStats) -> String {
    let mut text = format!(
        "📊 <b>Admin Statistics</b>\n\n\
🤖 <b>System Status</b>: Online ✅\n\
🧠 <b>AI Service</b>: {}\n\
🏢 <b>Branches</b>: {}\n\
⚙️ <b>Environment</b>: {}\n\n\
📈 <b>Sessions</b>\n\
• Active: {} / {}\n\
• Errors: {}",
        encode_text(&settings.active_ai_service),
        settings.branches().len(),
        encode_text(&settings.environment),
        stats.active,
        stats.total,
        stats.total_errors
    );

    for (state, count) in &stats.by_state {
        let _ = write!(text, "\n• {state}: {count}");
    }
    for (workflow, count) in &stats.by_workflow {
        let _ = write!(text, "\n• workflow {workflow}: {count}");
    }
    text
}

/// One `/admin_stats` line about a branch's Drive folder and sheet tab
#[must_use]
pub fn branch_storage_line(
    branch: &str,
    folder: Option<(&DriveFile, &[DriveFile])>,
    sheet: Option<&SheetInfo>,
) -> String {
    let folder = folder.map_or_else(
        || "folder ❌".to_string(),
        |(parent, subfolders)| {
            format!(
                "📁 {} ({} subfolder)",
                encode_text(&parent.name),
                subfolders.len()
            )
        },
    );
    let sheet = sheet.map_or_else(
        || "sheet ❌".to_string(),
        |info| format!("📄 {} ({} baris)", encode_text(&info.title), info.row_count),
    );
    format!("• <b>{}</b>: {folder}, {sheet}", encode_text(branch))
}

// ─────────────────────────────────────────────────────────────────────────────
// Workflow texts
// ─────────────────────────────────────────────────────────────────────────────

/// Reply to an accepted photo
#[must_use]
pub fn photo_received(caption: Option<&str>) -> String {
    let caption_line = caption.map_or_else(String::new, |c| {
        format!("Caption '{}' disimpan sebagai nama toko.\n\n", encode_text(c))
    });
    format!("📸 <b>Foto diterima!</b>\n\n{caption_line}Silakan pilih cabang tujuan untuk menyimpan data:")
}

/// Reply to an accepted PDF
#[must_use]
pub fn pdf_received(file_name: &str, size: &str) -> String {
    format!(
        "📄 <b>PDF diterima!</b>\n\n\
📋 <b>File</b>: {}\n\
📊 <b>Ukuran</b>: {size}\n\n\
Silakan pilih cabang tujuan untuk menyimpan file:",
        encode_text(&truncate_with_ellipsis(file_name, FILE_NAME_DISPLAY_LIMIT))
    )
}

/// Upload above the configured limit
#[must_use]
pub fn file_too_large(limit_mb: u64) -> String {
    format!("❌ File terlalu besar. Maksimal {limit_mb}MB.")
}

/// PDF archived
#[must_use]
pub fn pdf_saved(branch: &str, file_name: &str) -> String {
    format!(
        "✅ <b>PDF berhasil disimpan!</b>\n\n\
📁 <b>Lokasi</b>: Cabang {} / Folder PDF\n\
📄 <b>Nama file</b>: {}\n\n\
Terima kasih! Silakan kirim file lain jika diperlukan.",
        encode_text(branch),
        encode_text(file_name)
    )
}

/// PDF upload failed
#[must_use]
pub fn pdf_save_failed(reason: &str) -> String {
    format!("❌ Gagal menyimpan PDF: {}", encode_text(reason))
}

/// Record saved to the sheet and archived
#[must_use]
pub fn save_success(document: &DocumentData, branch: &str) -> String {
    format!(
        "✅ <b>Berhasil disimpan!</b>\n\n\
📋 <b>Dokumen</b>: {}\n\
👤 <b>Nama</b>: {}\n\
📍 <b>Cabang</b>: {}\n\n\
📝 Data telah ditambahkan ke spreadsheet\n\
📁 File telah diarsipkan ke Google Drive\n\n\
Terima kasih! Silakan kirim dokumen lain jika diperlukan.",
        encode_text(&document.display_name()),
        encode_text(&document.nama),
        encode_text(branch)
    )
}

/// Prompt for a new field value
#[must_use]
pub fn edit_prompt(field: EditableField) -> String {
    format!(
        "✍️ <b>Mengubah: {}</b>\n\nSilakan kirimkan nilai baru untuk {}:",
        field.label(),
        field.label().to_lowercase()
    )
}

/// Text that does not fit the current step
#[must_use]
pub fn not_understood(workflow: Option<WorkflowType>, state: SessionState) -> String {
    format!(
        "🤔 <b>Pesan tidak dimengerti</b>\n\n\
Workflow aktif: {}\n\
State saat ini: {state}\n\n\
Silakan gunakan tombol yang tersedia atau ketik /cancel untuk membatalkan.",
        workflow.map_or("-", WorkflowType::as_str)
    )
}

/// Rejected edit value
#[must_use]
pub fn invalid_value(error: &ValidationError) -> String {
    format!("❌ {}", encode_text(&error.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Preview
// ─────────────────────────────────────────────────────────────────────────────

/// Review text shown before saving. Every user-supplied value is escaped.
#[must_use]
pub fn preview_text(
    document: &DocumentData,
    branch: &str,
    sheet: &str,
    nama_toko: Option<&str>,
) -> String {
    let mut lines = vec![
        "🔎 <b>Mohon periksa kembali data dari AI:</b>\n".to_string(),
        "📍 <b>Lokasi Simpan</b>".to_string(),
        format!("Cabang: {}", encode_text(branch)),
        format!("Sheet: {}\n", encode_text(sheet)),
    ];

    if let Some(toko) = nama_toko.map(str::trim).filter(|t| !t.is_empty()) {
        lines.push("🏬 <b>Nama Toko (dari caption)</b>".to_string());
        lines.push(format!("{}\n", encode_text(toko)));
    }

    lines.push(SEPARATOR.to_string());
    lines.push(format!(
        "📇 <b>Tipe Dokumen</b>: {}\n",
        encode_text(&document.display_name())
    ));
    lines.push(format!("👤 <b>Nama</b>: {}\n", encode_text(&document.nama)));

    match document.document_type {
        DocumentType::Ktp => {
            let nik = document.nik.as_deref().map_or_else(|| "-".to_string(), format_id_16);
            lines.push(format!("🔢 <b>NIK</b>: <code>{}</code>\n", encode_text(&nik)));
        }
        DocumentType::Npwp => {
            let npwp_15 = document
                .npwp_15
                .as_deref()
                .map_or_else(|| "-".to_string(), format_npwp_15);
            lines.push(format!(
                "🔢 <b>NPWP 15</b>: <code>{}</code>\n",
                encode_text(&npwp_15)
            ));
            if let Some(npwp_16) = document.npwp_16.as_deref() {
                lines.push(format!(
                    "🔢 <b>NPWP 16</b>: <code>{}</code>\n",
                    encode_text(&format_id_16(npwp_16))
                ));
            }
            let id_tku = document.id_tku();
            if !id_tku.is_empty() {
                lines.push(format!("🔑 <b>ID TKU</b>: <code>{id_tku}</code>\n"));
            }
        }
    }

    let alamat = match document.alamat.as_deref() {
        Some(a) if a.chars().count() > PREVIEW_ADDRESS_LIMIT => {
            format!("{}...", truncate_str(a, PREVIEW_ADDRESS_LIMIT))
        }
        Some(a) => a.to_string(),
        None => "-".to_string(),
    };
    lines.push(format!("🏠 <b>Alamat</b>: {}", encode_text(&alamat)));

    lines.push(SEPARATOR.to_string());
    lines.push("Apakah data di atas sudah benar?".to_string());
    lines.join("\n")
}

/// Preview of the session's document, `None` when it has no data or branch
#[must_use]
pub fn session_preview(session: &UserSession) -> Option<String> {
    let document = session.document.as_ref()?;
    let branch = session.branch.as_deref()?;
    let sheet = session.sheet_name.as_deref().unwrap_or_default();
    Some(preview_text(document, branch, sheet, session.nama_toko.as_deref()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Chat message for a session that moved on under a running step.
/// A missing session was dropped by `/start` or `/cancel`.
#[must_use]
pub const fn session_error_text(error: &SessionError) -> &'static str {
    match error {
        SessionError::NotFound => OPERATION_CANCELLED,
        SessionError::Expired => SESSION_EXPIRED,
        SessionError::InvalidTransition { .. } => STALE_BUTTON,
    }
}

/// Save refused because required fields are empty; the preview follows
#[must_use]
pub fn missing_fields_message(missing: &[&str], preview: &str) -> String {
    let labels: Vec<&str> = missing
        .iter()
        .map(|key| EditableField::from_key(key).map_or(*key, |field| field.label()))
        .collect();
    format!(
        "⚠️ <b>Data belum lengkap</b>: {}\nGunakan ✏️ Edit untuk melengkapi.\n\n{preview}",
        labels.join(", ")
    )
}

/// Chat message for a failed operation
#[must_use]
pub fn user_error_message(error: &anyhow::Error) -> String {
    if let Some(e) = error.downcast_ref::<AiError>() {
        return match e {
            AiError::RateLimit { .. } => RATE_LIMITED,
            _ => AI_FAILED,
        }
        .to_string();
    }
    if let Some(e) = error.downcast_ref::<GoogleError>() {
        return match e {
            GoogleError::InvalidBranch(_) => INVALID_BRANCH,
            _ => GOOGLE_FAILED,
        }
        .to_string();
    }
    if let Some(e) = error.downcast_ref::<SessionError>() {
        return session_error_text(e).to_string();
    }
    if let Some(e) = error.downcast_ref::<ValidationError>() {
        return invalid_value(e);
    }
    GENERIC_ERROR.to_string()
}
