//! Demo page with one upload form per transformation.

use crate::transform::Operation;

/// Forms shown on the demo page: title, operation and query string.
const FORM_EXAMPLES: &[(&str, Operation, &str)] = &[
    ("Resize", Operation::Resize, "width=300&height=200&type=jpeg"),
    ("Force resize", Operation::Resize, "width=300&height=200&force=true"),
    ("Crop", Operation::Crop, "width=300&quality=95"),
    ("Crop (north)", Operation::Crop, "width=300&height=260&quality=95&gravity=north"),
    ("Extract", Operation::Extract, "top=100&left=100&areawidth=300&areaheight=150"),
    ("Enlarge", Operation::Enlarge, "width=1440&height=900&quality=95"),
    ("Rotate", Operation::Rotate, "rotate=180"),
    ("AutoRotate", Operation::AutoRotate, "quality=90"),
    ("Flip", Operation::Flip, ""),
    ("Flop", Operation::Flop, ""),
    ("Thumbnail", Operation::Thumbnail, "width=100"),
    ("Zoom", Operation::Zoom, "factor=2&areawidth=300&areaheight=200&top=80&left=80"),
    ("Convert format", Operation::Convert, "type=png"),
    ("Negotiated format", Operation::Convert, "type=auto"),
    ("Image metadata", Operation::Info, ""),
    ("Gaussian blur", Operation::Blur, "sigma=15.0"),
];

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&#x27;"),
            _ => result.push(c),
        }
    }
    result
}

/// Render the demo page.
pub fn generate_form_html() -> String {
    let forms: String = FORM_EXAMPLES
        .iter()
        .map(|(title, operation, args)| {
            let action = if args.is_empty() {
                format!("/{}", operation)
            } else {
                format!("/{}?{}", operation, args)
            };
            format!(
                r#"
    <h1>{title}</h1>
    <form method="POST" action="{action}" enctype="multipart/form-data">
        <input type="file" name="file" />
        <input type="submit" value="Upload" />
    </form>"#,
                title = html_escape(title),
                action = html_escape(&action),
            )
        })
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>pictor</title>
</head>
<body>{forms}
</body>
</html>"#
    )
}
