//! Pages the server renders itself.

use maud::{DOCTYPE, Markup, html};

const STYLE: &str = "body{font:16px/1.5 system-ui,sans-serif;margin:4rem auto;max-width:36rem;color:#222}\
code{background:#f2f2f2;padding:0 .25em}small{color:#777}";

pub fn not_found(path: &str, pages: &[String]) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                title { "404 · webpipe" }
                style { (STYLE) }
            }
            body {
                h1 { "Not found" }
                p { "Nothing is built at " code { (path) } "." }
                @if !pages.is_empty() {
                    p { "Built pages:" }
                    ul {
                        @for page in pages {
                            li { a href={ "/" (page) } { (page) } }
                        }
                    }
                }
                p { small { "webpipe dev server" } }
            }
        }
    }
}
