//! Service treatment slip composer.
//!
//! Turns a sanitized [`ReportRecord`] plus per-contract enrichment into a
//! self-contained HTML document. Every image (photos, signatures, logos)
//! is inlined through the [`ImageCache`] so the rendering surface never
//! needs network access.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ComposerConfig;
use crate::image_cache::ImageCache;
use crate::models::{display_value, ChemicalEntry, CheckEntry, ContractDetail, ReportRecord};
use crate::render::PageFormat;

const CHECKED_BOX: &str = "&#9745;";
const UNCHECKED_BOX: &str = "&#9744;";

const STYLE: &str = r#"
body { font-family: 'Poppins', Arial, sans-serif; font-size: 8.5pt; color: #333; }
table { border-collapse: collapse; width: 100%; }
td { vertical-align: top; padding: 0; }
.header-logo { width: 160px; }
.header-address { font-size: 8.5pt; line-height: 1.4; padding-left: 20px; }
.header-hr { border: 0; border-top: 1px solid #000; margin: 8px 0; }
.title { font-size: 14pt; font-weight: bold; text-align: center; padding-bottom: 4px; border-bottom: 2px solid #000; margin-bottom: 10px; }
.info-grid { table-layout: fixed; }
.info-grid td { padding-bottom: 8px; }
.info-label { font-weight: bold; }
.product-logo { max-height: 40px; float: right; }
.section-title { font-weight: bold; text-decoration: underline; margin: 10px 0 5px; font-size: 10pt; }
.checkbox-grid { display: grid; grid-template-columns: repeat(4, 1fr); gap: 4px 15px; }
.box { font-size: 11pt; margin-right: 4px; }
.chemicals-table th, .chemicals-table td { border: 1px solid #000; padding: 4px; text-align: center; font-size: 8pt; }
.notes { margin-top: 8px; }
.notes-label { font-weight: bold; }
.keep-together { page-break-inside: avoid; }
.image-grid { display: grid; grid-template-columns: repeat(4, 1fr); gap: 10px; }
.image-cell { text-align: center; }
.image-cell img { max-width: 100%; height: 150px; object-fit: contain; border: 1px solid #ccc; }
.image-cell p { font-size: 8pt; margin-top: 0; }
.footer-text { font-size: 8pt; margin-top: 15px; }
.signatures { margin-top: 20px; table-layout: fixed; }
.signatures td { width: 50%; text-align: center; font-size: 9pt; }
.signatures img { width: 120px; height: 60px; object-fit: contain; margin: 10px auto; }
"#;

pub struct DocumentComposer {
    images: Arc<ImageCache>,
    settings: ComposerConfig,
    page_format: PageFormat,
}

impl DocumentComposer {
    pub fn new(images: Arc<ImageCache>, settings: ComposerConfig, page_format: PageFormat) -> Self {
        Self {
            images,
            settings,
            page_format,
        }
    }

    fn logo_for(&self, product: Option<&str>) -> Option<&PathBuf> {
        product.and_then(|name| self.settings.product_logos.get(name))
    }

    async fn image(&self, reference: Option<&str>) -> String {
        self.images.data_uri(reference).await
    }

    pub async fn compose(&self, report: &ReportRecord, detail: &ContractDetail) -> String {
        let mut html = String::with_capacity(16 * 1024);

        let _ = write!(
            html,
            "<!DOCTYPE html><html><head><meta charset=\"UTF-8\"><title>STS Report</title><style>@page {{ size: {} portrait; margin: 0.8cm; }}{}</style></head><body>",
            self.page_format.css_size(),
            STYLE
        );

        // Header
        html.push_str("<table><tr><td style=\"width: 50%; vertical-align: middle;\">");
        if let Some(logo) = &self.settings.header_logo {
            let uri = self.image(logo.to_str()).await;
            let _ = write!(html, "<img class=\"header-logo\" src=\"{}\">", uri);
        }
        html.push_str("</td><td class=\"header-address\" style=\"vertical-align: middle;\">");
        if let Some(name) = &self.settings.company_name {
            let _ = write!(html, "<div><b>{}</b></div>", escape(name));
        }
        if let Some(address) = &self.settings.company_address {
            let _ = write!(html, "<div>{}</div>", escape(address));
        }
        html.push_str("</td></tr></table><hr class=\"header-hr\"/>");
        html.push_str("<div class=\"title\">SERVICE TREATMENT SLIP (BERITA ACARA SERVICE)</div>");

        // Info grid
        let product_logo = match self.logo_for(report.product_service_name.as_deref()) {
            Some(path) => format!(
                "<img class=\"product-logo\" src=\"{}\">",
                self.image(path.to_str()).await
            ),
            None => String::new(),
        };
        let _ = write!(
            html,
            "<table class=\"info-grid\"><tr>\
             <td style=\"width: 33%;\">{}</td><td style=\"width: 33%;\">{}</td><td style=\"width: 34%;\">{}{}</td>\
             </tr><tr><td>{}</td><td>{}</td><td>{}</td></tr>\
             <tr><td colspan=\"3\"><div class=\"info-label\">Client Information :</div><div>{}</div><div>{}</div></td></tr></table>",
            info("Branch", &detail.branch_name),
            info("Time IN", &format_datetime(report.checkin_time.as_deref(), "%b %d %Y, %I:%M %p")),
            product_logo,
            info("Paket Program", report.product_service_name.as_deref().unwrap_or("N/A")),
            info("Report No", &report_number(report)),
            info("Time OUT", &format_datetime(report.checkout_time.as_deref(), "%b %d %Y, %I:%M %p")),
            info("Date", &format_datetime(report.date_work.as_deref(), "%b %d %Y")),
            escape(report.client_name.as_deref().unwrap_or("N/A")),
            escape(&detail.client_address),
        );

        html.push_str("<p><i><b>This is to advise you that our technician will carry out our service duties at your premises as follows :</b></i></p>");

        section(&mut html, "Type of Service");
        html.push_str(&checkbox_grid(&report.report_detail_treatments));
        note(&mut html, "Others (Please Specify):", report.note_type_service.as_deref());

        section(&mut html, "Type of Work");
        html.push_str(&checkbox_grid(&report.report_detail_type_works));
        note(&mut html, "Others:", report.note_type_work.as_deref());

        if !report.report_detail_feedbacks.is_empty() {
            section(&mut html, "Feedback");
            html.push_str(&checkbox_grid(&report.report_detail_feedbacks));
        }

        section(&mut html, "Pesticide Detail");
        let _ = write!(
            html,
            "<table class=\"chemicals-table\"><thead><tr><th>Active Ingredient</th><th>Dosis/Kons</th><th>Batch Number</th><th>Method of Application</th><th>Total Usage</th></tr></thead><tbody>{}</tbody></table>",
            chemical_rows(&report.report_detail_chemicals)
        );

        note(&mut html, "Action Taken:", report.note_action_taken.as_deref());
        note(&mut html, "Remarks:", report.note_remark.as_deref());

        // Photos and signatures stay on one page where possible
        html.push_str("<div class=\"keep-together\">");
        section(&mut html, "File Uploaded:");
        if report.uploaded_files.is_empty() {
            html.push_str("<p>No files uploaded.</p>");
        } else {
            html.push_str("<div class=\"image-grid\">");
            for file in &report.uploaded_files {
                let uri = self.image(file.remote_url.as_deref()).await;
                let _ = write!(
                    html,
                    "<div class=\"image-cell\"><img src=\"{}\" /><p>{}</p></div>",
                    uri,
                    escape(file.notes.as_deref().unwrap_or(""))
                );
            }
            html.push_str("</div>");
        }

        html.push_str("<div class=\"footer-text\">With this, it is our pleasure to inform you that all service requested has been completed well and delivered accordingly. I/We agree that all work has been performed to a satisfactory standard.</div>");

        let client_signature = self.image(report.url_signature_client.as_deref()).await;
        let technician_signature = self.image(report.url_signature_employee.as_deref()).await;
        let _ = write!(
            html,
            "<table class=\"signatures\"><tr>\
             <td><b>Signature Client</b><br/><img src=\"{}\" /><br/><hr/><span>{}</span></td>\
             <td><b>Technician</b><br/><img src=\"{}\" /><br/><hr/><span>{}</span></td>\
             </tr></table>",
            client_signature,
            escape(report.signature_client_name.as_deref().unwrap_or("")),
            technician_signature,
            escape(report.employee_name.as_deref().unwrap_or("")),
        );

        html.push_str("</div></body></html>");
        html
    }
}

fn info(label: &str, value: &str) -> String {
    format!(
        "<div class=\"info-label\">{} :</div><div>{}</div>",
        escape(label),
        escape(value)
    )
}

fn section(html: &mut String, title: &str) {
    let _ = write!(html, "<div class=\"section-title\">{}</div>", escape(title));
}

fn note(html: &mut String, label: &str, value: Option<&str>) {
    let value = match value.map(str::trim) {
        Some(v) if !v.is_empty() => escape(v),
        _ => "&nbsp;".to_string(),
    };
    let _ = write!(
        html,
        "<div class=\"notes\"><span class=\"notes-label\">{}</span> <span>{}</span></div>",
        escape(label),
        value
    );
}

fn checkbox_grid(items: &[CheckEntry]) -> String {
    if items.is_empty() {
        return "<p>N/A</p>".to_string();
    }
    let mut html = String::from("<div class=\"checkbox-grid\">");
    for item in items {
        let _ = write!(
            html,
            "<div><span class=\"box\">{}</span><label>{}</label></div>",
            if item.is_selected() { CHECKED_BOX } else { UNCHECKED_BOX },
            escape(item.label())
        );
    }
    html.push_str("</div>");
    html
}

fn chemical_rows(items: &[ChemicalEntry]) -> String {
    if items.is_empty() {
        return "<tr><td colspan=\"5\">No chemical data available.</td></tr>".to_string();
    }
    items
        .iter()
        .map(|item| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{} {}</td></tr>",
                escape(&display_value(&item.active_ingredient)),
                escape(&display_value(&item.dosis)),
                escape(&display_value(&item.no_batch)),
                escape(&display_value(&item.method_application_name)),
                escape(&display_value(&item.total_usage)),
                escape(&display_value(&item.uom_name)),
            )
        })
        .collect()
}

fn report_number(report: &ReportRecord) -> String {
    match (report.sequence_number, report.visit_total_base_period_contract) {
        (Some(seq), Some(total)) => format!("{} / {}", seq, total),
        _ => "N/A".to_string(),
    }
}

/// Reformat an ISO timestamp or bare date; unparseable input is returned
/// as-is and a missing value becomes `N/A`.
pub fn format_datetime(raw: Option<&str>, format: &str) -> String {
    let raw = match raw.map(str::trim) {
        Some(r) if !r.is_empty() => r,
        _ => return "N/A".to_string(),
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.format(format).to_string();
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return dt.format(format).to_string();
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return dt.format(format).to_string();
        }
    }
    raw.to_string()
}

/// Minimal HTML text escaping.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
