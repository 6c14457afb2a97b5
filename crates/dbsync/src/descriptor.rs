//! Descriptor codec: the XML document that describes the desired schema.
//!
//! ```xml
//! <?xml version="1.0" encoding="utf-8"?>
//! <tables>
//!   <table name="Users">
//!     <column name="Id" datatype="int identity" options="NOT NULL"/>
//!     <column name="Name" datatype="varchar(50)" options="NOT NULL"/>
//!     <primary_key name="PK_Users">
//!       <column name="Id"/>
//!     </primary_key>
//!     <index name="IX_Name" clustered="False" unique="False">
//!       <column name="Name" desc="False"/>
//!     </index>
//!     <foreign_key name="FK_Users_Roles" column="RoleId" pk_table="Roles" pk_column="Id"/>
//!     <default_record>
//!       <columnValue column="Name" type="text"><![CDATA[admin]]></columnValue>
//!       <columnValue column="Active" type="bool">true</columnValue>
//!     </default_record>
//!   </table>
//! </tables>
//! ```
//!
//! Inside a table the children must appear in the order shown: columns,
//! primary key, indexes, foreign keys, seed records. Elements the reader does
//! not know are skipped along with everything inside them, so newer documents
//! stay readable by older builds.

use crate::{Error, Result};
use dbsync_schema::{
    Column, ForeignKey, Index, IndexColumn, PrimaryKey, Schema, SeedRecord, SeedRecords,
    SortOrder, Table, Value, parse_bool,
};
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io;

const ROOT: &str = "tables";
const TABLE: &str = "table";
const COLUMN: &str = "column";
const PRIMARY_KEY: &str = "primary_key";
const INDEX: &str = "index";
const FOREIGN_KEY: &str = "foreign_key";
const DEFAULT_RECORD: &str = "default_record";
const COLUMN_VALUE: &str = "columnValue";

// =============================================================================
// Writing
// =============================================================================

/// Write `schema` as a descriptor, adding the seed records supplied for each
/// table after its foreign keys.
pub fn write<W: io::Write>(schema: &Schema, target: W, seeds: &SeedRecords) -> Result<()> {
    let mut writer = Writer::new_with_indent(target, b' ', 2);

    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)),
    )?;
    emit(&mut writer, Event::Start(BytesStart::new(ROOT)))?;
    for table in schema.tables() {
        tracing::debug!(table = table.name(), "writing descriptor table");
        write_table(&mut writer, table, seeds.for_table(table.name()))?;
    }
    emit(&mut writer, Event::End(BytesEnd::new(ROOT)))?;

    Ok(())
}

/// Write `schema` into a string.
pub fn to_string(schema: &Schema, seeds: &SeedRecords) -> Result<String> {
    let mut buf = Vec::new();
    write(schema, &mut buf, seeds)?;
    String::from_utf8(buf).map_err(|e| Error::Io(io::Error::other(e)))
}

fn write_table<W: io::Write>(
    writer: &mut Writer<W>,
    table: &Table,
    seeds: &[SeedRecord],
) -> Result<()> {
    let mut start = BytesStart::new(TABLE);
    start.push_attribute(("name", table.name()));
    emit(writer, Event::Start(start))?;

    for col in table.columns() {
        let mut el = BytesStart::new(COLUMN);
        el.push_attribute(("name", col.name.as_str()));
        el.push_attribute(("datatype", col.data_type.as_str()));
        el.push_attribute(("options", col.options.as_str()));
        emit(writer, Event::Empty(el))?;
    }

    if let Some(pk) = table.primary_key() {
        let mut el = BytesStart::new(PRIMARY_KEY);
        el.push_attribute(("name", pk.name().unwrap_or("")));
        if pk.is_empty() {
            emit(writer, Event::Empty(el))?;
        } else {
            emit(writer, Event::Start(el))?;
            for key_column in pk.columns() {
                let mut col = BytesStart::new(COLUMN);
                col.push_attribute(("name", key_column.as_str()));
                emit(writer, Event::Empty(col))?;
            }
            emit(writer, Event::End(BytesEnd::new(PRIMARY_KEY)))?;
        }
    }

    for idx in table.indexes() {
        let mut el = BytesStart::new(INDEX);
        el.push_attribute(("name", idx.name.as_str()));
        el.push_attribute(("clustered", bool_attr(idx.clustered)));
        el.push_attribute(("unique", bool_attr(idx.unique)));
        emit(writer, Event::Start(el))?;
        for idx_col in idx.columns() {
            let mut col = BytesStart::new(COLUMN);
            col.push_attribute(("name", idx_col.name.as_str()));
            col.push_attribute(("desc", bool_attr(idx_col.order.is_descending())));
            emit(writer, Event::Empty(col))?;
        }
        emit(writer, Event::End(BytesEnd::new(INDEX)))?;
    }

    for fk in table.foreign_keys() {
        let mut el = BytesStart::new(FOREIGN_KEY);
        el.push_attribute(("name", fk.name.as_str()));
        el.push_attribute(("column", fk.column.as_str()));
        el.push_attribute(("pk_table", fk.references_table.as_str()));
        el.push_attribute(("pk_column", fk.references_column.as_str()));
        emit(writer, Event::Empty(el))?;
    }

    if !seeds.is_empty() {
        tracing::debug!(
            table = table.name(),
            records = seeds.len(),
            "writing seed records"
        );
    }
    for record in seeds {
        emit(writer, Event::Start(BytesStart::new(DEFAULT_RECORD)))?;
        for (column, value) in record.values() {
            write_value(writer, column, value)?;
        }
        emit(writer, Event::End(BytesEnd::new(DEFAULT_RECORD)))?;
    }

    emit(writer, Event::End(BytesEnd::new(TABLE)))
}

fn write_value<W: io::Write>(writer: &mut Writer<W>, column: &str, value: &Value) -> Result<()> {
    let mut el = BytesStart::new(COLUMN_VALUE);
    el.push_attribute(("column", column));
    el.push_attribute(("type", value.type_tag()));

    match value {
        Value::Null => return emit(writer, Event::Empty(el)),
        Value::Text(text) => {
            emit(writer, Event::Start(el))?;
            // A CDATA section cannot contain `]]>`, so split it across sections.
            let parts: Vec<&str> = text.split("]]>").collect();
            let last = parts.len() - 1;
            for (i, part) in parts.iter().enumerate() {
                let mut chunk = String::new();
                if i > 0 {
                    chunk.push('>');
                }
                chunk.push_str(part);
                if i < last {
                    chunk.push_str("]]");
                }
                emit(writer, Event::CData(BytesCData::new(chunk)))?;
            }
        }
        other => {
            emit(writer, Event::Start(el))?;
            let raw = other.to_string();
            emit(writer, Event::Text(BytesText::new(&raw)))?;
        }
    }

    emit(writer, Event::End(BytesEnd::new(COLUMN_VALUE)))
}

fn bool_attr(v: bool) -> &'static str {
    if v { "True" } else { "False" }
}

fn emit<W: io::Write>(writer: &mut Writer<W>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| Error::Io(io::Error::other(e.to_string())))
}

// =============================================================================
// Reading
// =============================================================================

/// Read a descriptor into a schema.
pub fn read<R: io::Read>(mut source: R) -> Result<Schema> {
    let mut text = String::new();
    source.read_to_string(&mut text)?;
    from_str(&text)
}

/// Parse a descriptor held in a string.
pub fn from_str(text: &str) -> Result<Schema> {
    let root = parse_tree(text)?;
    if root.name != ROOT {
        return Err(Error::parse(format!(
            "expected <{}> as root element, found <{}>",
            ROOT, root.name
        )));
    }

    let mut schema = Schema::new();
    for child in &root.children {
        if child.name != TABLE {
            tracing::debug!(element = %child.name, "skipping unknown element");
            continue;
        }
        schema.insert_table(read_table(child)?)?;
    }
    Ok(schema)
}

/// Position of each child kind inside `<table>`. Kinds may repeat but never
/// go backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Columns,
    PrimaryKey,
    Indexes,
    ForeignKeys,
    SeedRecords,
}

impl Stage {
    fn of(element: &str) -> Option<Stage> {
        match element {
            COLUMN => Some(Stage::Columns),
            PRIMARY_KEY => Some(Stage::PrimaryKey),
            INDEX => Some(Stage::Indexes),
            FOREIGN_KEY => Some(Stage::ForeignKeys),
            DEFAULT_RECORD => Some(Stage::SeedRecords),
            _ => None,
        }
    }

    fn element(self) -> &'static str {
        match self {
            Stage::Columns => COLUMN,
            Stage::PrimaryKey => PRIMARY_KEY,
            Stage::Indexes => INDEX,
            Stage::ForeignKeys => FOREIGN_KEY,
            Stage::SeedRecords => DEFAULT_RECORD,
        }
    }
}

fn read_table(el: &Element) -> Result<Table> {
    let mut table = Table::new(el.required("name")?);
    let mut stage = Stage::Columns;

    for child in &el.children {
        let Some(next) = Stage::of(&child.name) else {
            tracing::debug!(
                table = table.name(),
                element = %child.name,
                "skipping unknown element"
            );
            continue;
        };
        if next < stage {
            return Err(Error::parse(format!(
                "<{}> in table '{}' appears after <{}>",
                child.name,
                table.name(),
                stage.element()
            )));
        }
        stage = next;

        match next {
            Stage::Columns => {
                table.add_column(Column::new(
                    child.required("name")?,
                    child.required("datatype")?,
                    child.attr("options").unwrap_or(""),
                ))?;
            }
            Stage::PrimaryKey => {
                let mut pk = PrimaryKey::new(child.attr("name").map(str::to_string));
                for col in child.children_named(COLUMN) {
                    pk.add_column(col.required("name")?)?;
                }
                table.set_primary_key(pk)?;
            }
            Stage::Indexes => {
                let mut idx = Index::new(
                    child.required("name")?,
                    child.flag("clustered")?,
                    child.flag("unique")?,
                );
                for col in child.children_named(COLUMN) {
                    idx.add_column(IndexColumn {
                        name: col.required("name")?.to_string(),
                        order: SortOrder::from_descending(col.flag("desc")?),
                    })?;
                }
                table.add_index(idx)?;
            }
            Stage::ForeignKeys => {
                table.add_foreign_key(ForeignKey::new(
                    child.required("name")?,
                    child.required("column")?,
                    child.required("pk_table")?,
                    child.required("pk_column")?,
                ))?;
            }
            Stage::SeedRecords => {
                let mut record = SeedRecord::new();
                for value_el in child.children_named(COLUMN_VALUE) {
                    let column = value_el.required("column")?;
                    record.set(column, read_value(value_el, column)?)?;
                }
                table.add_seed_record(record);
            }
        }
    }

    Ok(table)
}

fn read_value(el: &Element, column: &str) -> Result<Value> {
    let tag = el.attr("type").unwrap_or("text");
    Value::from_tagged(tag, &el.text).ok_or_else(|| {
        Error::parse(format!(
            "invalid {} value {:?} for column '{}'",
            tag, el.text, column
        ))
    })
}

/// A parsed element: just enough of XML for descriptors.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn open(start: &BytesStart<'_>) -> Result<Element> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr
                .map_err(|e| Error::parse(format!("bad attribute on <{}>: {}", name, e)))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| Error::parse(format!("bad attribute on <{}>: {}", name, e)))?
                .into_owned();
            attrs.push((key, value));
        }
        Ok(Element {
            name,
            attrs,
            ..Default::default()
        })
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn required(&self, key: &str) -> Result<&str> {
        self.attr(key).ok_or_else(|| {
            Error::parse(format!(
                "<{}> is missing the required '{}' attribute",
                self.name, key
            ))
        })
    }

    /// A boolean attribute; absent means false.
    fn flag(&self, key: &str) -> Result<bool> {
        match self.attr(key) {
            None => Ok(false),
            Some(raw) => parse_bool(raw).ok_or_else(|| {
                Error::parse(format!(
                    "attribute '{}' on <{}> is not a boolean: {:?}",
                    key, self.name, raw
                ))
            }),
        }
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }
}

fn parse_tree(text: &str) -> Result<Element> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            Error::parse(format!("at byte {}: {}", reader.buffer_position(), e))
        })?;
        match event {
            Event::Start(start) => stack.push(Element::open(&start)?),
            Event::Empty(start) => {
                let el = Element::open(&start)?;
                attach(&mut stack, &mut root, el)?;
            }
            Event::End(_) => {
                let el = stack
                    .pop()
                    .ok_or_else(|| Error::parse("closing tag without an opening tag"))?;
                attach(&mut stack, &mut root, el)?;
            }
            Event::Text(t) => {
                let unescaped = t
                    .unescape()
                    .map_err(|e| Error::parse(format!("bad text content: {}", e)))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&unescaped);
                }
            }
            Event::CData(c) => {
                let raw = c.into_inner();
                let content = std::str::from_utf8(&raw)
                    .map_err(|e| Error::parse(format!("CDATA is not UTF-8: {}", e)))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(content);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(Error::parse(format!(
            "document ends inside <{}>",
            open.name
        )));
    }
    root.ok_or_else(|| Error::parse("document has no root element"))
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(el);
    } else if root.is_some() {
        return Err(Error::parse("document has more than one root element"));
    } else {
        *root = Some(el);
    }
    Ok(())
}
