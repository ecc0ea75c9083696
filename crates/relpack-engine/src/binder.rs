//! Variable bindings and the corrected file lists
//!
//! The variable table declares, per key, the files the key is used in. The
//! declaration is advisory: after a dry run the list is rebuilt from where
//! each key was actually found, and that observed list is what gets written
//! back to the table on commit.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;
use relpack_core::model::{self, var_col};
use relpack_core::{ControlTable, CoreError, Result, Variable};

/// Checks the variable table and builds [`Bindings`] from it
pub struct VariableBinder;

impl VariableBinder {
    /// Fail on the first key defined twice
    ///
    /// Keys are compared after trimming. Rows are reported one-based.
    pub fn check_unique(table: &ControlTable) -> Result<()> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (idx, cells) in table.data_rows() {
            let key = cells.get(var_col::KEY).map(|k| k.trim()).unwrap_or("");
            if key.is_empty() {
                continue;
            }
            if let Some(&first) = seen.get(key) {
                return Err(CoreError::DuplicateVariableKey {
                    key: key.to_string(),
                    first_row: first + 1,
                    row: idx + 1,
                });
            }
            seen.insert(key, idx);
        }
        Ok(())
    }

    pub fn bind(table: &ControlTable) -> Result<Bindings> {
        Self::check_unique(table)?;
        Ok(Bindings::new(model::variables(table)))
    }
}

/// Key to value bindings plus what a dry run observed
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    variables: Vec<Variable>,
    values: HashMap<String, String>,
    /// Key -> files it was found in, in enumeration order
    observed: IndexMap<String, Vec<String>>,
    /// Keys found in templates without a binding
    undefined: BTreeSet<String>,
}

impl Bindings {
    pub fn new(variables: Vec<Variable>) -> Self {
        let mut values = HashMap::new();
        let mut observed = IndexMap::new();

        for var in &variables {
            values.insert(var.key.clone(), var.example.clone());
            observed.insert(var.key.clone(), Vec::new());
        }

        Self {
            variables,
            values,
            observed,
            undefined: BTreeSet::new(),
        }
    }

    pub fn values(&self) -> &HashMap<String, String> {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Record the keys found in one file
    pub fn record(&mut self, file: &str, matched: &BTreeSet<String>, missing: &BTreeSet<String>) {
        for key in matched {
            if let Some(files) = self.observed.get_mut(key) {
                if !files.iter().any(|f| f == file) {
                    files.push(file.to_string());
                }
            }
        }
        self.undefined.extend(missing.iter().cloned());
    }

    /// Files each key was actually found in, in table order
    pub fn corrected(&self) -> &IndexMap<String, Vec<String>> {
        &self.observed
    }

    /// Keys found in no template at all
    pub fn unused(&self) -> Vec<&str> {
        self.observed
            .iter()
            .filter(|(_, files)| files.is_empty())
            .map(|(key, _)| key.as_str())
            .collect()
    }

    /// Keys that declare files but were found in none of them
    pub fn unmatched_declarations(&self) -> Vec<(&str, &[String])> {
        self.variables
            .iter()
            .filter(|var| !var.files.is_empty())
            .filter(|var| {
                let found = self.observed.get(&var.key);
                !var
                    .files
                    .iter()
                    .any(|declared| found.is_some_and(|f| f.contains(declared)))
            })
            .map(|var| (var.key.as_str(), var.files.as_slice()))
            .collect()
    }

    /// Keys used in templates that the table does not define
    pub fn undefined(&self) -> &BTreeSet<String> {
        &self.undefined
    }

    /// Write the observed file lists into the file-path column
    ///
    /// One path per line. Returns the number of rows whose cell changed.
    pub fn write_back(&self, table: &mut ControlTable) -> usize {
        let mut changed = 0;
        for var in &self.variables {
            let files = self
                .observed
                .get(&var.key)
                .map(|f| f.join("\n"))
                .unwrap_or_default();
            if table.cell(var.row, var_col::FILES) != files {
                table.set_cell(var.row, var_col::FILES, files);
                changed += 1;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relpack_core::TableKind;

    const HEADER: &str = "序号,变量键（KEY）,变量描述,变量类型,填写示例,文件路径,填写说明";

    fn table(rows: &[&str]) -> ControlTable {
        let mut csv = String::from(HEADER);
        for row in rows {
            csv.push('\n');
            csv.push_str(row);
        }
        csv.push('\n');
        ControlTable::parse(csv.as_bytes(), TableKind::Variables, "global-vars.csv").unwrap()
    }

    fn keys(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_duplicate_key_is_fatal() {
        let vars = table(&["1,APP,,字符串,web,,", "2,PORT,,数值,80,,", "3, APP ,,字符串,api,,"]);
        let err = VariableBinder::bind(&vars).unwrap_err();
        match err {
            CoreError::DuplicateVariableKey {
                key,
                first_row,
                row,
            } => {
                assert_eq!(key, "APP");
                assert_eq!((first_row, row), (1, 3));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_values_use_example_column() {
        let vars = table(&["1,APP,name,字符串,web,k8s-resources/a.yaml,", "2,PORT,,数值,8080,,"]);
        let bindings = VariableBinder::bind(&vars).unwrap();
        assert_eq!(bindings.get("APP"), Some("web"));
        assert_eq!(bindings.get("PORT"), Some("8080"));
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings.variables()[0].files, vec!["k8s-resources/a.yaml"]);
    }

    #[test]
    fn test_observed_lists_replace_declarations() {
        let vars = table(&[
            "1,APP,,字符串,web,k8s-resources/old.yaml,",
            "2,PORT,,数值,8080,,",
            "3,UNUSED,,字符串,x,scripts/init.sh,",
        ]);
        let mut bindings = VariableBinder::bind(&vars).unwrap();

        bindings.record("k8s-resources/a.yaml", &keys(&["APP", "PORT"]), &keys(&["NOPE"]));
        bindings.record("scripts/run.sh", &keys(&["APP"]), &BTreeSet::new());
        bindings.record("k8s-resources/a.yaml", &keys(&["APP"]), &BTreeSet::new());

        assert_eq!(
            bindings.corrected()["APP"],
            vec!["k8s-resources/a.yaml", "scripts/run.sh"]
        );
        assert_eq!(bindings.unused(), vec!["UNUSED"]);
        assert_eq!(bindings.undefined(), &keys(&["NOPE"]));

        let unmatched: Vec<&str> = bindings
            .unmatched_declarations()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(unmatched, vec!["APP", "UNUSED"]);
    }

    #[test]
    fn test_write_back_one_path_per_line() {
        let mut vars = table(&["1,APP,,字符串,web,stale.yaml,", "2,PORT,,数值,8080,,"]);
        let mut bindings = VariableBinder::bind(&vars).unwrap();
        bindings.record("k8s-resources/a.yaml", &keys(&["APP"]), &BTreeSet::new());
        bindings.record("scripts/run.sh", &keys(&["APP"]), &BTreeSet::new());

        assert_eq!(bindings.write_back(&mut vars), 1);
        assert_eq!(
            vars.cell(0, var_col::FILES),
            "k8s-resources/a.yaml\nscripts/run.sh"
        );
        assert_eq!(vars.cell(1, var_col::FILES), "");

        let bytes = vars.to_bytes().unwrap();
        let reparsed =
            ControlTable::parse(&bytes, TableKind::Variables, "global-vars.csv").unwrap();
        assert_eq!(
            model::variables(&reparsed)[0].files,
            vec!["k8s-resources/a.yaml", "scripts/run.sh"]
        );
    }
}
