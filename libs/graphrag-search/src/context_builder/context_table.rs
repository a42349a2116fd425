/// One rendered `-----Name-----` table section and the ids of the rows that
/// fit into its budget.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextTable {
    pub text: String,
    pub tokens: usize,
    pub included_ids: Vec<String>,
}

impl ContextTable {
    pub fn is_empty(&self) -> bool {
        self.included_ids.is_empty()
    }
}

/// Renders rows under a header, stopping before the first row that would push
/// the section past `max_tokens`. Rows are `(id, cells)`.
pub fn build_context_table<I>(
    context_name: &str,
    header: &[&str],
    rows: I,
    column_delimiter: &str,
    max_tokens: usize,
    num_tokens_fn: fn(&str) -> usize,
) -> ContextTable
where
    I: IntoIterator<Item = (String, Vec<String>)>,
{
    let mut current_context_text = format!("-----{}-----\n{}\n", context_name, header.join(column_delimiter));
    let mut current_tokens = num_tokens_fn(&current_context_text);
    if current_tokens > max_tokens {
        return ContextTable::default();
    }

    let mut included_ids = Vec::new();
    for (id, cells) in rows {
        let mut new_context_text = cells.join(column_delimiter);
        new_context_text.push('\n');
        let new_tokens = num_tokens_fn(&new_context_text);

        if current_tokens + new_tokens > max_tokens {
            break;
        }

        current_context_text.push_str(&new_context_text);
        current_tokens += new_tokens;
        included_ids.push(id);
    }

    if included_ids.is_empty() {
        return ContextTable::default();
    }

    ContextTable {
        text: current_context_text,
        tokens: current_tokens,
        included_ids,
    }
}
