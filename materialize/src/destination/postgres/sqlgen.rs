//! SQL statements of a relational binding.

use pg_escape::quote_identifier;

use crate::binding::{Binding, ColumnType, Field};

/// Name of the temporary table staging the keys of binding `index` during Load.
pub fn load_table_name(index: usize) -> String {
    format!("flow_load_key_tmp_{index}")
}

fn column_type_sql(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::Integer => "BIGINT",
        ColumnType::Number => "DOUBLE PRECISION",
        ColumnType::String => "TEXT",
        ColumnType::Json => "JSON",
    }
}

fn column_names<'a>(fields: impl IntoIterator<Item = &'a Field>) -> Vec<String> {
    fields
        .into_iter()
        .map(|field| quote_identifier(&field.name).into_owned())
        .collect()
}

fn placeholders(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("${i}")).collect()
}

/// Statements of one binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSql {
    pub create_load_table: String,
    pub load_insert: String,
    /// Subquery of the Load union, without a trailing semicolon.
    pub load_query: String,
    /// Parameters: keys, then values, then the document.
    pub store_insert: String,
    /// Parameters: values, then the document, then keys.
    pub store_update: String,
}

impl BindingSql {
    pub fn new(table: &str, binding: &Binding) -> BindingSql {
        BindingSql {
            create_load_table: create_load_table(binding),
            load_insert: load_insert(binding),
            load_query: load_query(table, binding),
            store_insert: store_insert(table, binding),
            store_update: store_update(table, binding),
        }
    }
}

pub fn create_load_table(binding: &Binding) -> String {
    let columns = binding
        .keys
        .iter()
        .map(|key| {
            format!(
                "{} {} NOT NULL",
                quote_identifier(&key.name),
                column_type_sql(key.column_type)
            )
        })
        .collect::<Vec<_>>();

    format!(
        "\n\t\tCREATE TEMPORARY TABLE {} (\n\t\t\t{}\n\t\t) ON COMMIT DELETE ROWS\n\t\t;",
        load_table_name(binding.index),
        columns.join(", ")
    )
}

pub fn load_insert(binding: &Binding) -> String {
    format!(
        "\n\t\tINSERT INTO {} (\n\t\t\t{}\n\t\t) VALUES (\n\t\t\t{}\n\t\t);",
        load_table_name(binding.index),
        column_names(&binding.keys).join(", "),
        placeholders(1..binding.keys.len() + 1).join(", ")
    )
}

pub fn load_query(table: &str, binding: &Binding) -> String {
    let join = binding
        .keys
        .iter()
        .map(|key| {
            let column = quote_identifier(&key.name);
            format!("l.{column} = r.{column}")
        })
        .collect::<Vec<_>>();

    format!(
        "\n\t\tSELECT {}, l.{}\n\t\t\tFROM {} AS l\n\t\t\tJOIN {} AS r\n\t\t\tON {}\n\t\t",
        binding.index,
        quote_identifier(&binding.document.name),
        quote_identifier(table),
        load_table_name(binding.index),
        join.join(" AND ")
    )
}

/// Combines the Load subqueries of every binding into one statement.
pub fn load_union<'a>(queries: impl IntoIterator<Item = &'a str>) -> String {
    let mut union = queries.into_iter().collect::<Vec<_>>().join("\nUNION ALL\n");
    union.push(';');
    union
}

pub fn store_insert(table: &str, binding: &Binding) -> String {
    let columns = column_names(
        binding
            .keys
            .iter()
            .chain(&binding.values)
            .chain(std::iter::once(&binding.document)),
    );

    format!(
        "INSERT INTO {} ({}) VALUES ({});",
        quote_identifier(table),
        columns.join(", "),
        placeholders(1..columns.len() + 1).join(", ")
    )
}

pub fn store_update(table: &str, binding: &Binding) -> String {
    let set = column_names(binding.values.iter().chain(std::iter::once(&binding.document)));
    let keys = column_names(&binding.keys);

    let assignments = set
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{column} = ${}", i + 1))
        .collect::<Vec<_>>();
    let conditions = keys
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{column} = ${}", set.len() + i + 1))
        .collect::<Vec<_>>();

    format!(
        "UPDATE {} SET {} WHERE {};",
        quote_identifier(table),
        assignments.join(", "),
        conditions.join(" AND ")
    )
}

/// DDL creating the target table of `binding` when missing.
pub fn create_table(table: &str, binding: &Binding) -> String {
    let mut columns = Vec::new();
    for key in &binding.keys {
        columns.push(format!(
            "\t{} {} NOT NULL",
            quote_identifier(&key.name),
            column_type_sql(key.column_type)
        ));
    }
    for value in &binding.values {
        let not_null = if value.nullable { "" } else { " NOT NULL" };
        columns.push(format!(
            "\t{} {}{not_null}",
            quote_identifier(&value.name),
            column_type_sql(value.column_type)
        ));
    }
    columns.push(format!(
        "\t{} JSON NOT NULL",
        quote_identifier(&binding.document.name)
    ));

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{},\n\n\tPRIMARY KEY ({})\n);",
        quote_identifier(table),
        columns.join(",\n"),
        column_names(&binding.keys).join(", ")
    )
}
