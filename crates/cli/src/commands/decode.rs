use async_trait::async_trait;
use clap::Args;
use grafter_core::{Attribute, ClassFile, Code, Insn};
use std::error::Error;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

/// Raw attributes longer than this are abbreviated in listings.
const ATTRIBUTE_PREVIEW: usize = 32;

/// Arguments for the `decode` subcommand.
#[derive(Args)]
pub struct DecodeArgs {
    /// Class file to decode
    pub file: PathBuf,
    /// Omit method bodies
    #[arg(long)]
    pub summary: bool,
}

#[async_trait]
impl super::Command for DecodeArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let bytes = fs::read(&self.file).map_err(|e| format!("{}: {e}", self.file.display()))?;
        let class = ClassFile::parse(&bytes).map_err(|e| format!("{}: {e}", self.file.display()))?;
        print!("{}", render(&class, !self.summary));
        Ok(())
    }
}

/// Renders a readable listing of `class`.
pub fn render(class: &ClassFile, bodies: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}{} {} (version {}.{})",
        keywords(&class.access.keywords(false)),
        if class.is_interface() { "interface" } else { "class" },
        class.name,
        class.major_version,
        class.minor_version
    );
    if let Some(super_name) = &class.super_name {
        let _ = writeln!(out, "  extends {super_name}");
    }
    if !class.interfaces.is_empty() {
        let _ = writeln!(out, "  implements {}", class.interfaces.join(", "));
    }
    let _ = writeln!(out, "  constant pool: {} entries", class.pool.len());
    attributes(&mut out, "  ", &class.attributes);

    for field in &class.fields {
        let _ = writeln!(out, "\n  {}{} {}", keywords(&field.access.keywords(false)), field.name, field.desc);
        attributes(&mut out, "    ", &field.attributes);
    }
    for method in &class.methods {
        let _ = writeln!(out, "\n  {}{}{}", keywords(&method.access.keywords(true)), method.name, method.desc);
        attributes(&mut out, "    ", &method.attributes);
        if let (true, Some(code)) = (bodies, &method.code) {
            disassemble(&mut out, code);
        }
    }
    out
}

fn keywords(words: &str) -> String {
    if words.is_empty() {
        String::new()
    } else {
        format!("{words} ")
    }
}

fn attributes(out: &mut String, indent: &str, attributes: &[Attribute]) {
    for attr in attributes {
        let preview = &attr.data[..attr.data.len().min(ATTRIBUTE_PREVIEW)];
        let ellipsis = if attr.data.len() > ATTRIBUTE_PREVIEW { "..." } else { "" };
        let _ = writeln!(
            out,
            "{indent}@{} [{} bytes] {}{ellipsis}",
            attr.name,
            attr.data.len(),
            hex::encode(preview)
        );
    }
}

fn disassemble(out: &mut String, code: &Code) {
    let _ = writeln!(out, "    stack={} locals={}", code.max_stack, code.max_locals);
    let mut index = 0;
    for insn in &code.insns {
        match insn {
            Insn::Label(_) | Insn::Line(_) => {
                let _ = writeln!(out, "      {insn}");
            }
            _ => {
                let _ = writeln!(out, "      {index:>4}  {insn}");
                index += 1;
            }
        }
    }
    for handler in &code.handlers {
        let _ = writeln!(
            out,
            "    try {}..{} -> {} catch {}",
            handler.start,
            handler.end,
            handler.handler,
            handler.catch_type.as_deref().unwrap_or("any")
        );
    }
}
