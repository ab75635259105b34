//! Spreadsheet exports of processed records and of the messaging contact list.
use crate::model::{local_offset, MessagingStatus, SurveyRecord};
use crate::notify::whatsapp_number;
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use rust_xlsxwriter::{Format, FormatAlign, Workbook, XlsxError};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

pub const SURVEYS_FILE: &str = "questionarios.xlsx";
pub const CONTACTS_FILE: &str = "contatos-whatsapp.xlsx";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no records found to export")]
    Empty,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("spreadsheet error: {0}")]
    Xlsx(#[from] XlsxError),
}

/// Survey sheet columns as (header, width).
pub const SURVEY_COLUMNS: &[(&str, f64)] = &[
    ("Status Processamento", 15.0),
    ("Data Envio", 20.0),
    ("Funcionário", 20.0),
    ("Clube", 25.0),
    ("Cidade", 20.0),
    ("Estado", 10.0),
    ("Nome Cliente", 30.0),
    ("Telefone Cliente", 20.0),
    ("Email Cliente", 30.0),
    ("Clube Cliente", 30.0),
    ("Cidade Cliente", 30.0),
    ("Estado Cliente", 30.0),
    ("Marca Carrinho", 15.0),
    ("Modelo Carrinho", 15.0),
    ("Num Carrinho", 15.0),
    ("Cor Carrinho", 15.0),
    ("Marca Bateria", 20.0),
    ("Tipo Bateria", 15.0),
    ("Tensão Bateria", 15.0),
    ("Qtd Bateria", 10.0),
    ("Verif: Caixa", 15.0),
    ("Verif: Parafusos", 15.0),
    ("Verif: Terminais", 15.0),
    ("Verif: Polos", 15.0),
    ("Verif: Nível", 15.0),
    ("Verif: Tensões", 30.0),
    ("Verif: Densidade", 30.0),
    ("Comentário", 40.0),
    ("PDF Gerado", 12.0),
    ("Status Email", 15.0),
    ("Status WhatsApp", 15.0),
    ("Data Processamento Fim", 20.0),
    ("Mensagem Erro", 40.0),
];

pub const CONTACT_COLUMNS: &[(&str, f64)] = &[("Nome_Contato", 30.0), ("Número", 20.0)];

/// `dd/mm/yyyy, HH:MM:SS` in São Paulo time.
pub fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|ts| {
        ts.with_timezone(&local_offset())
            .format("%d/%m/%Y, %H:%M:%S")
            .to_string()
    })
    .unwrap_or_default()
}

fn or_empty(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

pub fn survey_row(record: &SurveyRecord) -> Vec<String> {
    let s = &record.survey;
    let (u, c, cart, check) = (&s.employee, &s.customer, &s.cart, &s.battery_check);
    vec![
        record.status.as_str().to_string(),
        format_timestamp(Some(record.submitted_at)),
        u.name.clone(),
        u.club.clone(),
        u.city.clone(),
        u.state.clone(),
        c.name.clone(),
        c.phone.clone(),
        or_empty(&c.email),
        c.club.clone(),
        c.city.clone(),
        c.state.clone(),
        cart.brand.clone(),
        or_empty(&cart.model),
        or_empty(&cart.number),
        or_empty(&cart.color),
        cart.battery_brand.clone(),
        cart.battery_type.clone(),
        cart.battery_voltage.clone(),
        cart.battery_count.clone(),
        check.case.clone(),
        check.screws.clone(),
        check.terminals.clone(),
        check.poles.clone(),
        check.level.clone(),
        s.voltages.join(", "),
        s.densities.as_ref().map(|d| d.join(", ")).unwrap_or_default(),
        or_empty(&s.comment),
        match record.rendered {
            Some(true) => "Sim".to_string(),
            Some(false) => "Não".to_string(),
            None => String::new(),
        },
        record.email_status.map(|e| e.as_str()).unwrap_or("").to_string(),
        record.messaging_status.map(|m| m.as_str()).unwrap_or("").to_string(),
        format_timestamp(record.finished_at),
        or_empty(&record.error_message),
    ]
}

/// One row per distinct normalized phone among records delivered over WhatsApp,
/// keeping the first name seen for each number.
pub fn contact_rows(records: &[SurveyRecord]) -> Vec<Vec<String>> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| r.messaging_status == Some(MessagingStatus::Success))
        .filter_map(|r| {
            let number = whatsapp_number(&r.survey.customer.phone)?;
            seen.insert(number.clone())
                .then(|| vec![r.survey.customer.name.trim().to_string(), number])
        })
        .collect()
}

fn write_sheet(
    path: &Path,
    sheet_name: &str,
    columns: &[(&str, f64)],
    rows: &[Vec<String>],
) -> Result<(), ExportError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_name)?;

    let header = Format::new()
        .set_bold()
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter);
    for (col, (title, width)) in columns.iter().enumerate() {
        let col = col as u16;
        worksheet.write_string_with_format(0, col, *title, &header)?;
        worksheet.set_column_width(col, *width)?;
    }
    for (i, row) in rows.iter().enumerate() {
        for (col, value) in row.iter().enumerate() {
            worksheet.write_string(i as u32 + 1, col as u16, value.as_str())?;
        }
    }

    workbook.save(path)?;
    Ok(())
}

pub fn write_surveys_xlsx(path: &Path, records: &[SurveyRecord]) -> Result<usize, ExportError> {
    if records.is_empty() {
        return Err(ExportError::Empty);
    }
    let rows: Vec<Vec<String>> = records.iter().map(survey_row).collect();
    write_sheet(path, "Questionários", SURVEY_COLUMNS, &rows)?;
    Ok(rows.len())
}

pub fn write_contacts_xlsx(path: &Path, records: &[SurveyRecord]) -> Result<usize, ExportError> {
    let rows = contact_rows(records);
    if rows.is_empty() {
        return Err(ExportError::Empty);
    }
    write_sheet(path, "Contatos", CONTACT_COLUMNS, &rows)?;
    Ok(rows.len())
}
