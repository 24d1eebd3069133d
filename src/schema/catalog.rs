//! Column catalog loading.
//!
//! The catalog is a flat list of rows, one per column, grouped here into
//! tables in first-seen order. It can come from:
//! - a CSV file or reader (French, English or snake_case headers)
//! - a JSON array of row objects using the same field names
//! - an in-memory iterator of [`CatalogRow`]
//!
//! Only an unreadable source is an error. Rows that are empty, malformed,
//! carry unsafe identifiers or repeat a column are skipped with a log line.

use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use super::checksum::{checksum_bytes, checksum_records};
use super::error::CatalogLoadError;
use super::identifier::validate_identifier;
use super::type_mapping::{map_format, SqlType};

/// Table type used when the catalog leaves it empty
pub const DEFAULT_TABLE_TYPE: &str = "REFERENCE";
/// Format used when the catalog leaves it empty
pub const DEFAULT_FORMAT: &str = "VARCHAR(255)";

/// Characters stripped from every field and header
const INVISIBLE_CHARS: &[char] = &['\u{feff}', '\u{200b}', '\u{200c}', '\u{200d}', '\u{2060}'];

/// Canonical field names and the header spellings accepted for each
const HEADER_ALIASES: &[(&str, &[&str])] = &[
    ("table", &["Table", "table"]),
    ("column", &["Colonne", "Column", "column"]),
    ("display_label", &["Libellé Affichage", "Display Label", "display_label"]),
    ("description", &["Description", "description"]),
    ("possible_values", &["Valeurs Possibles", "Possible Values", "possible_values"]),
    ("primary_key", &["Clé Primaire", "Primary Key", "primary_key"]),
    ("foreign_key", &["Clé Etrangère", "Clé Étrangère", "Foreign Key", "foreign_key"]),
    ("fk_reference", &["Référence FK", "FK Reference", "fk_reference"]),
    ("format", &["Format", "format"]),
    ("table_type", &["Type Table", "Table Type", "table_type"]),
];

/// One raw catalog row, before cleaning
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CatalogRow {
    pub table: String,
    pub column: String,
    pub display_label: String,
    pub description: String,
    pub possible_values: String,
    #[serde(deserialize_with = "text_or_bool")]
    pub primary_key: String,
    #[serde(deserialize_with = "text_or_bool")]
    pub foreign_key: String,
    pub fk_reference: String,
    pub format: String,
    pub table_type: String,
}

impl CatalogRow {
    /// Convenience constructor for a row with only the structural fields set
    pub fn new(table: &str, column: &str, format: &str) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            format: format.to_string(),
            ..Default::default()
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = "TRUE".to_string();
        self
    }

    pub fn references(mut self, reference: &str) -> Self {
        self.foreign_key = "TRUE".to_string();
        self.fk_reference = reference.to_string();
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.display_label = label.to_string();
        self
    }

    fn fields(&self) -> [&str; 10] {
        [
            self.table.as_str(),
            self.column.as_str(),
            self.display_label.as_str(),
            self.description.as_str(),
            self.possible_values.as_str(),
            self.primary_key.as_str(),
            self.foreign_key.as_str(),
            self.fk_reference.as_str(),
            self.format.as_str(),
            self.table_type.as_str(),
        ]
    }
}

fn text_or_bool<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
        Other(serde::de::IgnoredAny),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(true) => "TRUE".to_string(),
        Flag::Bool(false) => String::new(),
        Flag::Text(text) => text,
        Flag::Other(_) => String::new(),
    })
}

/// Remove invisible characters and surrounding whitespace
pub fn clean_field(value: &str) -> String {
    value
        .chars()
        .filter(|c| !INVISIBLE_CHARS.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}

fn is_flag_set(value: &str) -> bool {
    clean_field(value).eq_ignore_ascii_case("TRUE")
}

/// Canonical field name for a header, if it is one we know
pub fn canonical_header(header: &str) -> Option<&'static str> {
    let header = clean_field(header);
    HEADER_ALIASES
        .iter()
        .find(|(_, aliases)| aliases.iter().any(|alias| alias.eq_ignore_ascii_case(&header)))
        .map(|(canonical, _)| *canonical)
}

/// One column of a catalog table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub table: String,
    pub column: String,
    /// Falls back to the column name
    pub display_label: String,
    pub description: String,
    pub possible_values: String,
    /// Raw format token; `VARCHAR(255)` when the catalog leaves it empty
    pub format: String,
    pub sql_type: SqlType,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub fk_reference: Option<String>,
    pub table_type: String,
}

/// A catalog table with its columns in catalog order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: String,
    /// Taken from the first row that sets it, `REFERENCE` otherwise
    pub table_type: String,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.column == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Primary-key columns in catalog order; empty for keyless tables
    pub fn primary_key(&self) -> Vec<&ColumnDescriptor> {
        self.columns.iter().filter(|c| c.is_primary_key).collect()
    }

    /// Whether the primary key is exactly the single column `name`
    pub fn is_sole_primary_key(&self, name: &str) -> bool {
        matches!(self.primary_key().as_slice(), [only] if only.column == name)
    }
}

/// The loaded catalog
///
/// Immutable once built; every component takes it by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    tables: Vec<TableDescriptor>,
    index: HashMap<String, usize>,
    checksum: String,
}

impl Catalog {
    /// Load from a file, choosing the format by extension
    ///
    /// `.json` is read as JSON, anything else as CSV.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogLoadError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| CatalogLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        log::info!("Loading catalog from {}", path.display());
        if is_json {
            Self::from_json_slice(&data)
        } else {
            Self::from_csv_slice(&data)
        }
    }

    pub fn from_csv_reader<R: Read>(mut reader: R) -> Result<Self, CatalogLoadError> {
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| CatalogLoadError::Csv(e.into()))?;
        Self::from_csv_slice(&data)
    }

    pub fn from_csv_slice(data: &[u8]) -> Result<Self, CatalogLoadError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(data);

        let raw_headers = reader.headers()?.clone();
        let headers: csv::StringRecord = raw_headers
            .iter()
            .map(|h| canonical_header(h).map_or_else(|| clean_field(h), str::to_string))
            .collect();
        log::debug!("Catalog headers: {:?}", headers.iter().collect::<Vec<_>>());

        if !headers.iter().any(|h| h == "table") {
            return Err(CatalogLoadError::MissingHeader("Table"));
        }
        if !headers.iter().any(|h| h == "column") {
            return Err(CatalogLoadError::MissingHeader("Colonne"));
        }
        let width = headers.len();
        let rows = reader.into_records().map(|result| {
            let mut record = result.map_err(|e| e.to_string())?;
            // Short rows leave their trailing optional columns empty.
            while record.len() < width {
                record.push_field("");
            }
            record
                .deserialize::<CatalogRow>(Some(&headers))
                .map_err(|e| e.to_string())
        });
        Ok(Self::assemble(rows, checksum_bytes(data)))
    }

    pub fn from_json_reader<R: Read>(mut reader: R) -> Result<Self, CatalogLoadError> {
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| CatalogLoadError::Json(serde_json::Error::io(e)))?;
        Self::from_json_slice(&data)
    }

    /// Parse a JSON array of row objects
    ///
    /// Keys are matched with the same aliases as CSV headers.
    pub fn from_json_slice(data: &[u8]) -> Result<Self, CatalogLoadError> {
        let values: Vec<serde_json::Value> = serde_json::from_slice(data)?;
        let rows = values.into_iter().map(|value| match value {
            serde_json::Value::Object(object) => {
                let canonical: serde_json::Map<String, serde_json::Value> = object
                    .into_iter()
                    .map(|(key, v)| {
                        let key = canonical_header(&key).map_or(key, str::to_string);
                        (key, v)
                    })
                    .collect();
                serde_json::from_value::<CatalogRow>(serde_json::Value::Object(canonical))
                    .map_err(|e| e.to_string())
            }
            other => Err(format!("expected an object, found {other}")),
        });
        Ok(Self::assemble(rows, checksum_bytes(data)))
    }

    /// Build from rows already in memory
    pub fn from_rows(rows: impl IntoIterator<Item = CatalogRow>) -> Self {
        let rows: Vec<CatalogRow> = rows.into_iter().collect();
        let checksum = checksum_records(rows.iter().map(CatalogRow::fields));
        Self::assemble(rows.into_iter().map(Ok), checksum)
    }

    fn assemble(rows: impl Iterator<Item = Result<CatalogRow, String>>, checksum: String) -> Self {
        let mut tables: Vec<TableDescriptor> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for (i, row) in rows.enumerate() {
            let row_num = i + 1;
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    log::warn!("Skipping catalog row {row_num}: {e}");
                    continue;
                }
            };

            let table = clean_field(&row.table);
            let column = clean_field(&row.column);
            if table.is_empty() || column.is_empty() {
                log::debug!("Skipping catalog row {row_num}: empty table or column");
                continue;
            }
            if let Err(e) = validate_identifier(&table) {
                log::warn!("Skipping catalog row {row_num}: table name rejected: {e}");
                continue;
            }
            if let Err(e) = validate_identifier(&column) {
                log::warn!("Skipping catalog row {row_num}: column name rejected: {e}");
                continue;
            }

            let table_type = clean_field(&row.table_type);
            let position = *index.entry(table.clone()).or_insert_with(|| {
                tables.push(TableDescriptor {
                    name: table.clone(),
                    table_type: String::new(),
                    columns: Vec::new(),
                });
                tables.len() - 1
            });
            let descriptor = &mut tables[position];

            if descriptor.has_column(&column) {
                log::warn!("Skipping catalog row {row_num}: duplicate column {table}.{column}");
                continue;
            }
            if descriptor.table_type.is_empty() && !table_type.is_empty() {
                descriptor.table_type = table_type.clone();
            }

            let format = match clean_field(&row.format) {
                f if f.is_empty() => DEFAULT_FORMAT.to_string(),
                f => f,
            };
            let display_label = match clean_field(&row.display_label) {
                l if l.is_empty() => column.clone(),
                l => l,
            };
            let fk_reference = Some(clean_field(&row.fk_reference)).filter(|r| !r.is_empty());

            log::trace!("Catalog row {row_num}: {table}.{column} {format}");
            descriptor.columns.push(ColumnDescriptor {
                sql_type: map_format(&format),
                table: table.clone(),
                column,
                display_label,
                description: clean_field(&row.description),
                possible_values: clean_field(&row.possible_values),
                format,
                is_primary_key: is_flag_set(&row.primary_key),
                is_foreign_key: is_flag_set(&row.foreign_key),
                fk_reference,
                table_type: if table_type.is_empty() {
                    DEFAULT_TABLE_TYPE.to_string()
                } else {
                    table_type
                },
            });
        }

        for table in &mut tables {
            if table.table_type.is_empty() {
                table.table_type = DEFAULT_TABLE_TYPE.to_string();
            }
        }

        log::info!(
            "Catalog loaded: {} table(s), {} column(s)",
            tables.len(),
            tables.iter().map(|t| t.columns.len()).sum::<usize>()
        );
        Self {
            tables,
            index,
            checksum,
        }
    }

    /// Tables in first-seen order
    pub fn tables(&self) -> &[TableDescriptor] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.index.get(name).map(|&i| &self.tables[i])
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnDescriptor> {
        self.table(table).and_then(|t| t.column(column))
    }

    pub fn columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.tables.iter().flat_map(|t| t.columns.iter())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// SHA-256 of the source the catalog was loaded from
    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRENCH_CSV: &str = "\u{feff}Table,Colonne,Description,Valeurs Possibles,Clé Primaire,Clé Etrangère,Référence FK,Format,Type Table,Libellé Affichage
clients,id,Identifiant,,TRUE,FALSE,,SERIAL,PRINCIPALE,Identifiant
clients,codeClient,Code client,,false,false,,VARCHAR(50),,Code Client
,orphan,,,,,,,,
villes,codeVilles,,,TRUE,,,VARCHAR(10),,
villes,libelle,,,,,,,,Libellé
clients,typeClient\u{200b},,PARTICULIER / SOCIETE,,,,VARCHAR(20),,
";

    #[test]
    fn test_french_csv_with_bom() {
        let catalog = Catalog::from_csv_slice(FRENCH_CSV.as_bytes()).unwrap();
        let names: Vec<&str> = catalog.tables().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["clients", "villes"]);

        let clients = catalog.table("clients").unwrap();
        assert_eq!(clients.table_type, "PRINCIPALE");
        let columns: Vec<&str> = clients.columns.iter().map(|c| c.column.as_str()).collect();
        assert_eq!(columns, vec!["id", "codeClient", "typeClient"]);

        let id = clients.column("id").unwrap();
        assert!(id.is_primary_key);
        assert_eq!(id.sql_type, SqlType::Serial);
        assert_eq!(id.description, "Identifiant");

        let type_client = clients.column("typeClient").unwrap();
        assert_eq!(type_client.possible_values, "PARTICULIER / SOCIETE");
        assert_eq!(type_client.display_label, "typeClient");
    }

    #[test]
    fn test_defaults_for_empty_fields() {
        let catalog = Catalog::from_csv_slice(FRENCH_CSV.as_bytes()).unwrap();
        let villes = catalog.table("villes").unwrap();
        assert_eq!(villes.table_type, DEFAULT_TABLE_TYPE);

        let libelle = villes.column("libelle").unwrap();
        assert_eq!(libelle.format, "VARCHAR(255)");
        assert_eq!(libelle.sql_type, SqlType::Varchar(255));
        assert_eq!(libelle.display_label, "Libellé");
        assert!(!libelle.is_primary_key);
        assert_eq!(libelle.fk_reference, None);
    }

    #[test]
    fn test_english_and_snake_headers() {
        let csv = "Table,Column,Primary Key,Foreign Key,FK Reference,Format
orders,id,TRUE,,,SERIAL
orders,clientCode,,True,clients(codeClient),VARCHAR(50)
";
        let catalog = Catalog::from_csv_slice(csv.as_bytes()).unwrap();
        let code = catalog.column("orders", "clientCode").unwrap();
        assert!(code.is_foreign_key);
        assert_eq!(code.fk_reference.as_deref(), Some("clients(codeClient)"));

        let snake = "table,column,primary_key,format\nt,a,true,INT\n";
        let catalog = Catalog::from_csv_slice(snake.as_bytes()).unwrap();
        assert!(catalog.column("t", "a").unwrap().is_primary_key);
    }

    #[test]
    fn test_missing_required_header() {
        let err = Catalog::from_csv_slice(b"Name,Format\nx,INT\n").unwrap_err();
        assert!(matches!(err, CatalogLoadError::MissingHeader("Table")));
    }

    #[test]
    fn test_short_rows_padded_and_bad_identifiers_skipped() {
        let csv = "Table,Colonne,Format
clients,id
clients,date naissance,DATE
clients;drop,id,INT
clients,id,INT
";
        let catalog = Catalog::from_csv_slice(csv.as_bytes()).unwrap();
        let clients = catalog.table("clients").unwrap();
        assert_eq!(clients.columns.len(), 1);
        assert_eq!(clients.columns[0].format, "VARCHAR(255)");
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_short_rows_default_missing_columns_to_empty() {
        let csv = "Table,Colonne,Description,Clé Primaire,Format
clients,id,Identifiant,TRUE
clients,nom
";
        let catalog = Catalog::from_csv_slice(csv.as_bytes()).unwrap();
        let clients = catalog.table("clients").unwrap();
        assert_eq!(clients.columns.len(), 2);
        assert!(clients.columns[0].is_primary_key);
        assert_eq!(clients.columns[0].description, "Identifiant");
        assert_eq!(clients.columns[1].column, "nom");
        assert_eq!(clients.columns[1].description, "");
        assert!(!clients.columns[1].is_primary_key);
        assert_eq!(clients.columns[1].format, "VARCHAR(255)");
    }

    #[test]
    fn test_json_catalog_accepts_booleans_and_aliases() {
        let json = r#"[
            {"Table": "clients", "Colonne": "id", "Clé Primaire": true, "Format": "SERIAL"},
            {"table": "orders", "column": "clientId", "foreign_key": "TRUE", "fk_reference": "clients(id)", "format": "INT"},
            "not an object"
        ]"#;
        let catalog = Catalog::from_json_slice(json.as_bytes()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.column("clients", "id").unwrap().is_primary_key);
        let fk = catalog.column("orders", "clientId").unwrap();
        assert_eq!(fk.sql_type, SqlType::Integer);
        assert_eq!(fk.fk_reference.as_deref(), Some("clients(id)"));
    }

    #[test]
    fn test_invalid_json_is_a_load_error() {
        assert!(matches!(
            Catalog::from_json_slice(b"{not json"),
            Err(CatalogLoadError::Json(_))
        ));
    }

    #[test]
    fn test_from_rows_checksum_is_stable() {
        let rows = || {
            vec![
                CatalogRow::new("clients", "id", "SERIAL").primary_key(),
                CatalogRow::new("clients", "nom", "VARCHAR(100)").label("Nom"),
            ]
        };
        let a = Catalog::from_rows(rows());
        let b = Catalog::from_rows(rows());
        assert_eq!(a.checksum(), b.checksum());
        assert_eq!(a.checksum().len(), 64);
        assert!(a.table("clients").unwrap().is_sole_primary_key("id"));
    }

    #[test]
    fn test_composite_key_is_not_sole_primary_key() {
        let catalog = Catalog::from_rows(vec![
            CatalogRow::new("clients_relations", "idClient", "INT").primary_key(),
            CatalogRow::new("clients_relations", "idClientLie", "INT").primary_key(),
        ]);
        let table = catalog.table("clients_relations").unwrap();
        assert_eq!(table.primary_key().len(), 2);
        assert!(!table.is_sole_primary_key("idClient"));
    }

    #[test]
    fn test_canonical_header() {
        assert_eq!(canonical_header("\u{feff}Table"), Some("table"));
        assert_eq!(canonical_header(" Libellé Affichage "), Some("display_label"));
        assert_eq!(canonical_header("Clé Étrangère"), Some("foreign_key"));
        assert_eq!(canonical_header("Unknown"), None);
    }
}
