//! Emits object blocks in the same layout the engine writes them.

use super::{ObjectDecl, ObjectKind};

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

/// Render one object block, preceded by a blank line.
pub fn write_object(obj: &ObjectDecl) -> String {
    let keyword = match obj.kind {
        ObjectKind::Singleton => "singleton",
        ObjectKind::New => "new",
    };
    let mut out = format!("\n{keyword} {}({})\n{{\n", obj.class, obj.name);
    for field in &obj.fields {
        let index = field.index.map(|i| format!("[{i}]")).unwrap_or_default();
        out.push_str(&format!(
            "   {}{index} = \"{}\";\n",
            field.name,
            escape(&field.value)
        ));
    }
    out.push_str("};\n");
    out
}

/// Render a sequence of object blocks as a complete script.
pub fn write_objects<'a, I>(objects: I) -> String
where
    I: IntoIterator<Item = &'a ObjectDecl>,
{
    objects.into_iter().map(write_object).collect()
}
