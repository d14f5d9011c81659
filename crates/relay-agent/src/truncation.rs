/// Cap a tool result at `max_chars`, keeping its head and tail around a
/// marker that says how much was dropped.
pub fn truncate_tool_output(output: &str, max_chars: usize) -> String {
    let char_count = output.chars().count();
    if char_count <= max_chars {
        return output.to_string();
    }

    let removed = char_count.saturating_sub(max_chars);
    let head = max_chars / 2;
    let tail = max_chars.saturating_sub(head);
    format!(
        "{}\n\n[WARNING: Tool output was truncated. {} characters were removed from the middle.]\n\n{}",
        take_head(output, head),
        removed,
        take_tail(output, tail)
    )
}

fn take_head(input: &str, char_count: usize) -> String {
    input.chars().take(char_count).collect()
}

fn take_tail(input: &str, char_count: usize) -> String {
    let total = input.chars().count();
    input
        .chars()
        .skip(total.saturating_sub(char_count))
        .collect()
}
