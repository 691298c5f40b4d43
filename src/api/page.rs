//! Landing page with the add/remove forms.

/// Inline outcome shown above the forms after a submission.
pub struct Notice<'a> {
    pub ok: bool,
    pub message: &'a str,
}

impl<'a> Notice<'a> {
    pub fn success(message: &'a str) -> Self {
        Self { ok: true, message }
    }

    pub fn error(message: &'a str) -> Self {
        Self { ok: false, message }
    }
}

const PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Token Management</title>
    <style>
        body {
            font-family: Arial, sans-serif;
            margin: 0;
            background-color: #1a1a1a;
            color: white;
            display: flex;
            align-items: center;
            justify-content: center;
            height: 100vh;
        }
        .container { text-align: center; }
        input {
            padding: 10px;
            margin: 10px 0;
            width: 300px;
            border-radius: 5px;
            border: 1px solid #444;
            background-color: #333;
            color: white;
        }
        button {
            padding: 10px 20px;
            border: none;
            border-radius: 5px;
            background-color: #5c6bc0;
            color: white;
            cursor: pointer;
        }
        form { margin-bottom: 20px; }
        .notice { padding: 10px; border-radius: 5px; margin-bottom: 20px; }
        .notice.ok { background-color: #2e7d32; }
        .notice.err { background-color: #c62828; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Token Management</h1>
        {{notice}}
        <form action="/add_key" method="post">
            <input type="text" name="key" placeholder="Enter your token to add" required>
            <button type="submit">Add Token</button>
        </form>
        <form action="/remove_key" method="post">
            <input type="text" name="key" placeholder="Enter your token to remove" required>
            <button type="submit">Remove Token</button>
        </form>
    </div>
</body>
</html>
"#;

pub fn render(notice: Option<Notice<'_>>) -> String {
    let block = match notice {
        Some(n) => format!(
            r#"<div class="notice {}">{}</div>"#,
            if n.ok { "ok" } else { "err" },
            escape(n.message)
        ),
        None => String::new(),
    };
    PAGE.replace("{{notice}}", &block)
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
