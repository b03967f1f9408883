use async_trait::async_trait;
use clap::Args;
use grafter_core::{FieldType, MethodDescriptor};
use grafter_mixin::hooks::{FieldHook, HookFile, MethodHook};
use grafter_mixin::{math, HookTable};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

/// Arguments for the `hooks` subcommand.
#[derive(Args)]
pub struct HooksArgs {
    /// Hook table (JSON)
    pub file: PathBuf,
}

#[async_trait]
impl super::Command for HooksArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let text = fs::read_to_string(&self.file).map_err(|e| format!("{}: {e}", self.file.display()))?;
        let file: HookFile =
            serde_json::from_str(&text).map_err(|e| format!("{}: {e}", self.file.display()))?;
        let problems = validate(&file);
        print!("{}", summarise(&HookTable::from(file)));
        if problems.is_empty() {
            return Ok(());
        }
        for problem in &problems {
            eprintln!("error: {problem}");
        }
        Err(format!("{} problems in {}", problems.len(), self.file.display()).into())
    }
}

/// Lists everything in `file` that would fail at resolution time.
pub fn validate(file: &HookFile) -> Vec<String> {
    let mut problems = Vec::new();
    let mut names = HashSet::new();
    for class in &file.classes {
        if !names.insert(class.name.as_str()) {
            problems.push(format!("class hook {} is declared twice", class.name));
        }
        let mut members = HashSet::new();
        for field in &class.fields {
            if !members.insert(field.name.as_str()) {
                problems.push(format!("field hook {}.{} is declared twice", class.name, field.name));
            }
            check_field(&mut problems, &class.name, field);
        }
        let mut members = HashSet::new();
        for method in &class.methods {
            if !members.insert(method.name.as_str()) {
                problems.push(format!("method hook {}.{} is declared twice", class.name, method.name));
            }
            check_method(&mut problems, &class.name, method);
        }
    }
    for field in &file.static_fields {
        if field.owner.is_empty() {
            problems.push(format!("static field hook {} has no owner", field.name));
        }
        check_field(&mut problems, "<static>", field);
    }
    for method in &file.static_methods {
        if method.owner.is_empty() {
            problems.push(format!("static method hook {} has no owner", method.name));
        }
        check_method(&mut problems, "<static>", method);
    }
    problems
}

fn check_field(problems: &mut Vec<String>, class: &str, field: &FieldHook) {
    let ty = match FieldType::parse(&field.desc) {
        Ok(ty) => ty,
        Err(e) => {
            problems.push(format!("field hook {class}.{}: {e}", field.name));
            return;
        }
    };
    let Some(m) = field.multiplier else { return };
    let invertible = match ty {
        FieldType::Int => i32::try_from(m).ok().and_then(math::inverse_i32).is_some(),
        FieldType::Long => math::inverse_i64(m).is_some(),
        _ => {
            problems.push(format!(
                "field hook {class}.{} has multiplier {m} on type {ty}",
                field.name
            ));
            return;
        }
    };
    if !invertible {
        problems.push(format!(
            "field hook {class}.{} has multiplier {m} with no inverse",
            field.name
        ));
    }
}

fn check_method(problems: &mut Vec<String>, class: &str, method: &MethodHook) {
    if let Err(e) = MethodDescriptor::parse(&method.desc) {
        problems.push(format!("method hook {class}.{}: {e}", method.name));
    }
}

/// One line per class hook plus the static totals.
pub fn summarise(table: &HookTable) -> String {
    let mut out = String::new();
    for class in table.classes() {
        let multiplied = class.fields.iter().filter(|f| f.multiplier.is_some()).count();
        let _ = writeln!(
            out,
            "{:<24} -> {:<8} {} fields ({multiplied} multiplied), {} methods",
            class.name,
            class.obf_name,
            class.fields.len(),
            class.methods.len()
        );
    }
    let _ = writeln!(
        out,
        "{} classes, {} static fields, {} static methods",
        table.classes().len(),
        table.static_field_count(),
        table.static_method_count()
    );
    out
}
