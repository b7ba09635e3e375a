use loam_language::{Language, Symbol};

use crate::Subtree;

/// Where a node sits relative to the node being rendered.
#[derive(Clone, Copy)]
enum Field<'a> {
    Root,
    None,
    Named(&'a str),
}

struct SexpWriter<'a> {
    language: &'a Language,
    out: String,
}

pub(crate) fn write(subtree: &Subtree, alias: Symbol, language: &Language) -> String {
    let alias_is_named = alias != 0 && language.node_kind_is_named(alias);
    let mut writer = SexpWriter { language, out: String::new() };
    writer.write(subtree, alias, alias_is_named, Field::Root);
    writer.out
}

impl<'a> SexpWriter<'a> {
    fn write(&mut self, tree: &Subtree, alias: Symbol, alias_is_named: bool, field: Field<'a>) {
        let language = self.language;
        let is_root = matches!(field, Field::Root);
        let is_visible = tree.is_missing()
            || if alias != 0 { alias_is_named } else { tree.visible() && tree.named() };
        let symbol = if alias != 0 { alias } else { tree.symbol() };
        let mut opened = false;

        if is_visible {
            if !is_root {
                self.out.push(' ');
                if let Field::Named(name) = field {
                    self.out.push_str(name);
                    self.out.push_str(": ");
                }
            }
            opened = true;
            if tree.is_error() && tree.child_count() == 0 && u32::from(tree.size().bytes) > 0 {
                self.out.push_str("(UNEXPECTED ");
                self.write_char(tree.lookahead_char());
            } else if tree.is_missing() {
                self.out.push_str("(MISSING ");
                let name = language.symbol_name(symbol);
                if alias_is_named || tree.named() {
                    self.out.push_str(name);
                } else {
                    self.out.push('"');
                    self.out.push_str(name);
                    self.out.push('"');
                }
            } else {
                self.out.push('(');
                self.out.push_str(language.symbol_name(symbol));
            }
        } else if is_root {
            let name = language.symbol_name(symbol);
            if tree.child_count() > 0 {
                self.out.push('(');
                self.out.push_str(name);
                opened = true;
            } else if tree.named() {
                self.out.push('(');
                self.out.push_str(name);
                self.out.push(')');
            } else {
                self.out.push_str("(\"");
                self.out.push_str(name);
                self.out.push_str("\")");
            }
        }

        let field_map = language.field_map(tree.production_id());
        let mut structural_index = 0;
        for child in tree.children() {
            if child.extra() {
                self.write(child, 0, false, Field::None);
                continue;
            }
            let child_alias = language.alias_at(tree.production_id(), structural_index);
            let child_alias_is_named = child_alias != 0 && language.node_kind_is_named(child_alias);
            let mut child_field = if is_visible || is_root { Field::None } else { field };
            if let Some(entry) = field_map
                .iter()
                .find(|entry| !entry.inherited && entry.child_index as usize == structural_index)
            {
                if let Some(name) = language.field_name_for_id(entry.field_id) {
                    child_field = Field::Named(name);
                }
            }
            self.write(child, child_alias, child_alias_is_named, child_field);
            structural_index += 1;
        }

        if opened {
            self.out.push(')');
        }
    }

    fn write_char(&mut self, c: char) {
        match c {
            '\0' => self.out.push_str("'\\0'"),
            '\n' => self.out.push_str("'\\n'"),
            '\t' => self.out.push_str("'\\t'"),
            '\r' => self.out.push_str("'\\r'"),
            c if c.is_ascii_graphic() || c == ' ' => {
                self.out.push('\'');
                self.out.push(c);
                self.out.push('\'');
            }
            c => self.out.push_str(&(c as u32).to_string()),
        }
    }
}
