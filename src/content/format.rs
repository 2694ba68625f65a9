/// Links the first literal, case-sensitive mention of `product_name` in
/// `body`. Later mentions and near-miss casings are left alone; a body with
/// no mention comes back unchanged.
pub fn link_first_mention(body: &str, product_name: &str, product_url: &str) -> String {
    if product_name.is_empty() || !body.contains(product_name) {
        return body.to_string();
    }
    let anchor = format!("<a href=\"{product_url}\">{product_name}</a>");
    body.replacen(product_name, &anchor, 1)
}
