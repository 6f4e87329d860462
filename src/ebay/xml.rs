/// Tolerant field extraction for Trading API XML responses.
///
/// The Trading API returns large documents of which we need a handful of
/// scalar fields. Instead of a full XML parse these helpers scan for named
/// tags and never fail: a missing or malformed field reads as empty, and
/// the caller applies its own defaults.
pub fn text(xml: &str, tag: &str) -> String {
    let mut from = 0;
    while let Some((open_end, self_closing)) = find_open(xml, tag, from) {
        if self_closing {
            from = open_end;
            continue;
        }
        match scalar_content(xml, tag, open_end) {
            Some(content) => return decode_entities(content.trim()),
            None => from = open_end,
        }
    }
    String::new()
}

/// Every scalar occurrence of `tag`, in document order.
pub fn text_all(xml: &str, tag: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut from = 0;
    while let Some((open_end, self_closing)) = find_open(xml, tag, from) {
        from = open_end;
        if self_closing {
            continue;
        }
        if let Some(content) = scalar_content(xml, tag, open_end) {
            values.push(decode_entities(content.trim()));
            from = open_end + content.len();
        }
    }
    values
}

/// Inner bodies of `<tag>...</tag>` element blocks, children included.
/// Each block ends at the first matching close tag, which is enough for
/// the non-nested containers the Trading API uses (`Item`,
/// `SellingStatus`, `NameValueList`).
pub fn blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let close = format!("</{tag}>");
    let mut found = Vec::new();
    let mut from = 0;
    while let Some((open_end, self_closing)) = find_open(xml, tag, from) {
        if self_closing {
            from = open_end;
            continue;
        }
        match xml[open_end..].find(&close) {
            Some(rel) => {
                found.push(&xml[open_end..open_end + rel]);
                from = open_end + rel + close.len();
            }
            None => break,
        }
    }
    found
}

/// Attribute value on the first opening `tag`, e.g. `currencyID` on
/// `<CurrentPrice currencyID="USD">`.
pub fn attr(xml: &str, tag: &str, name: &str) -> Option<String> {
    let open = format!("<{tag}");
    let mut from = 0;
    while let Some(rel) = xml[from..].find(&open) {
        let at = from + rel + open.len();
        let next = xml[at..].chars().next()?;
        if next != '>' && next != '/' && !next.is_whitespace() {
            from = at;
            continue;
        }
        let tag_end = xml[at..].find('>').map(|i| at + i)?;
        let attrs = &xml[at..tag_end];
        let marker = format!("{name}=\"");
        let start = attrs.find(&marker)? + marker.len();
        let end = attrs[start..].find('"')? + start;
        return Some(attrs[start..end].to_string());
    }
    None
}

/// Locates `<tag>` or `<tag attr...>` at or after `from`. Returns the
/// byte offset just past the closing `>` and whether the tag was
/// self-closing.
fn find_open(xml: &str, tag: &str, from: usize) -> Option<(usize, bool)> {
    let open = format!("<{tag}");
    let mut cursor = from;
    loop {
        let rel = xml[cursor..].find(&open)?;
        let name_end = cursor + rel + open.len();
        let rest = &xml[name_end..];
        let next = rest.chars().next()?;
        // Reject prefix hits such as <TitleLength> when scanning for Title.
        if next != '>' && next != '/' && !next.is_whitespace() {
            cursor = name_end;
            continue;
        }
        let gt = rest.find('>')?;
        let self_closing = rest[..gt].ends_with('/');
        return Some((name_end + gt + 1, self_closing));
    }
}

/// Content between an open tag ending at `open_end` and the matching
/// close tag, but only when it is pure text. Elements with children do
/// not count as scalar hits, mirroring how the fields we extract are laid
/// out in practice.
fn scalar_content<'a>(xml: &'a str, tag: &str, open_end: usize) -> Option<&'a str> {
    let rest = &xml[open_end..];
    let lt = rest.find('<')?;
    let close = format!("</{tag}>");
    if rest[lt..].starts_with(&close) {
        Some(&rest[..lt])
    } else {
        None
    }
}

fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }
    input
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<GetSellerListResponse xmlns="urn:ebay:apis:eBLBaseComponents">
  <Ack>Success</Ack>
  <HasMoreItems>true</HasMoreItems>
  <Item>
    <ItemID>1100001</ItemID>
    <Title>Nike Dri-Fit Tee &amp; Shorts Set</Title>
    <SellingStatus>
      <CurrentPrice currencyID="USD">24.99</CurrentPrice>
    </SellingStatus>
    <PictureDetails>
      <PictureURL>https://i.ebayimg.com/a.jpg</PictureURL>
      <PictureURL>https://i.ebayimg.com/b.jpg</PictureURL>
    </PictureDetails>
  </Item>
  <Item>
    <ItemID>1100002</ItemID>
    <Title> Champion Hoodie </Title>
  </Item>
</GetSellerListResponse>"#;

    #[test]
    fn scalar_field_first_occurrence() {
        assert_eq!(text(SAMPLE, "Ack"), "Success");
        assert_eq!(text(SAMPLE, "ItemID"), "1100001");
    }

    #[test]
    fn missing_field_reads_empty() {
        assert_eq!(text(SAMPLE, "Quantity"), "");
        assert!(attr(SAMPLE, "Quantity", "currencyID").is_none());
    }

    #[test]
    fn entities_decoded_and_trimmed() {
        assert_eq!(text(SAMPLE, "Title"), "Nike Dri-Fit Tee & Shorts Set");
        let second = blocks(SAMPLE, "Item")[1];
        assert_eq!(text(second, "Title"), "Champion Hoodie");
    }

    #[test]
    fn element_with_children_is_not_scalar() {
        // <Item> and <SellingStatus> contain elements, so a scalar read
        // skips past them rather than returning markup.
        assert_eq!(text(SAMPLE, "PictureDetails"), "");
        let price = text(SAMPLE, "CurrentPrice");
        assert_eq!(price, "24.99");
    }

    #[test]
    fn attribute_on_open_tag() {
        assert_eq!(
            attr(SAMPLE, "CurrentPrice", "currencyID").as_deref(),
            Some("USD")
        );
    }

    #[test]
    fn repeated_fields_in_document_order() {
        let urls = text_all(SAMPLE, "PictureURL");
        assert_eq!(
            urls,
            vec![
                "https://i.ebayimg.com/a.jpg".to_string(),
                "https://i.ebayimg.com/b.jpg".to_string(),
            ]
        );
    }

    #[test]
    fn blocks_split_per_item() {
        let items = blocks(SAMPLE, "Item");
        assert_eq!(items.len(), 2);
        assert_eq!(text(items[0], "ItemID"), "1100001");
        assert_eq!(text(items[1], "ItemID"), "1100002");
    }

    #[test]
    fn prefix_tag_names_do_not_collide() {
        let xml = "<TitleLength>80</TitleLength><Title>Real</Title>";
        assert_eq!(text(xml, "Title"), "Real");
    }

    #[test]
    fn self_closing_tags_read_empty() {
        let xml = "<Quantity/><Quantity>3</Quantity>";
        assert_eq!(text(xml, "Quantity"), "3");
        assert_eq!(text("<SKU/>", "SKU"), "");
    }

    #[test]
    fn malformed_fragments_never_panic() {
        assert_eq!(text("<Title>unclosed", "Title"), "");
        assert_eq!(text("<Title", "Title"), "");
        assert!(blocks("<Item><ItemID>1</ItemID>", "Item").is_empty());
    }
}
