/// Dedup key for a deal: the normalized SKU when it has content, otherwise the
/// normalized name. Cosmetic variants (case, padding, repeated spaces) collide.
pub fn compute_key(sku: Option<&str>, name: &str) -> String {
    sku.map(normalize)
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| normalize(name))
}

fn normalize(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
