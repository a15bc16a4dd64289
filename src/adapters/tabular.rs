use crate::domain::model::{Table, Value};
use crate::utils::error::{ReconError, Result};
use chrono::Datelike;
use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};

pub fn encode_csv(table: &Table) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row.values().iter().map(|v| v.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| ReconError::IoError(e.into_error()))
}

pub fn encode_xlsx(table: &Table, sheet_name: &str) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let date_format = Format::new().set_num_format("yyyy-mm-dd");

    let sheet = workbook.add_worksheet();
    sheet.set_name(sheet_name)?;

    for (col, name) in table.columns().iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, name, &header)?;
    }

    for (r, row) in table.rows().iter().enumerate() {
        let r = (r + 1) as u32;
        for (col, value) in row.values().iter().enumerate() {
            let col = col as u16;
            match value {
                Value::Text(s) => {
                    sheet.write_string(r, col, s)?;
                }
                Value::Number(n) => {
                    sheet.write_number(r, col, *n)?;
                }
                Value::Date(d) => {
                    let date = ExcelDateTime::from_ymd(d.year() as u16, d.month() as u8, d.day() as u8)?;
                    sheet.write_datetime_with_format(r, col, &date, &date_format)?;
                }
                Value::Empty => {}
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loader::parse_spreadsheet;
    use chrono::NaiveDate;

    fn sample() -> Table {
        let mut table = Table::from_rows("catalog", &["ASIN", "SKU", "Cost"], &[&["B001", "AAAA-111111", ""]]);
        table.set(0, "Cost", Value::Number(10.0));
        table.push_row(vec![Value::text("B002, \"quoted\""), Value::text("BBBB-222222"), Value::Empty]);
        table
    }

    #[test]
    fn test_csv_quotes_and_formats_numbers() {
        let bytes = encode_csv(&sample()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "ASIN,SKU,Cost\nB001,AAAA-111111,10\n\"B002, \"\"quoted\"\"\",BBBB-222222,\n"
        );
    }

    #[test]
    fn test_xlsx_is_readable() {
        let mut table = sample();
        table.ensure_column("Date");
        table.set(0, "Date", Value::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()));

        let bytes = encode_xlsx(&table, "Catalog").unwrap();
        let parsed = parse_spreadsheet("catalog.xlsx", &bytes, Some("Catalog"), 0).unwrap();

        assert_eq!(parsed.columns(), table.columns());
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.value(0, "Cost"), Some(&Value::Number(10.0)));
        assert_eq!(parsed.value(1, "Cost"), Some(&Value::Empty));
        assert_eq!(parsed.value(1, "ASIN"), Some(&Value::text("B002, \"quoted\"")));
        assert_eq!(
            parsed.value(0, "Date"),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()))
        );
    }
}
