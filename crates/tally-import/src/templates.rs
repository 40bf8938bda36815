use tally_platform::{ColumnMapping, MappingTemplate};

/// Rebuilds a mapping for a freshly detected set of columns from a saved template.
///
/// Columns the template knows keep their saved field and default; columns it
/// does not know stay unmapped. Template entries for columns missing from the
/// new file are dropped.
pub fn apply_template(template: &MappingTemplate, detected_columns: &[String]) -> Vec<ColumnMapping> {
    detected_columns
        .iter()
        .map(|column| {
            template
                .mappings
                .iter()
                .find(|saved| saved.column_name == *column)
                .cloned()
                .unwrap_or_else(|| ColumnMapping::unmapped(column.clone()))
        })
        .collect()
}
