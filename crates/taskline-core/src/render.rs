use std::collections::HashMap;
use std::io::{self, IsTerminal, Write};

use chrono::Local;
use unicode_width::UnicodeWidthStr;

use crate::category::Category;
use crate::config::Config;
use crate::filter::{FilterDescriptor, active_filter_count};
use crate::store::{LoadState, StoreError};
use crate::view::VisibleTasks;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

/// Snapshot shown by `taskline status`.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub api_url: String,
    pub offline: bool,
    pub tasks: (LoadState, usize),
    pub categories: (LoadState, usize),
    pub errors: Vec<StoreError>,
}

impl Renderer {
    pub fn new(cfg: &Config) -> Self {
        Self { color: cfg.color() }
    }

    #[tracing::instrument(skip_all, fields(shown = view.tasks.len()))]
    pub fn print_tasks(&self, view: &VisibleTasks, categories: &[Category]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_tasks(&mut out, view, categories)
    }

    fn write_tasks<W: Write>(
        &self,
        mut out: W,
        view: &VisibleTasks,
        categories: &[Category],
    ) -> anyhow::Result<()> {
        let names: HashMap<&str, &str> = categories
            .iter()
            .map(|c| (c.id.as_str(), c.name.as_str()))
            .collect();

        let headers = vec![
            "ID".to_string(),
            "Done".to_string(),
            "Category".to_string(),
            "Text".to_string(),
            "Tags".to_string(),
            "Created".to_string(),
        ];

        let rows = view
            .tasks
            .iter()
            .map(|task| {
                let done = if task.completed {
                    self.paint("x", "32")
                } else {
                    String::new()
                };
                let category = task
                    .category_id
                    .as_deref()
                    .map(|id| names.get(id).copied().unwrap_or(id).to_string())
                    .unwrap_or_default();
                let tags = task
                    .tags
                    .iter()
                    .map(|tag| format!("+{tag}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                let created = task
                    .created_at
                    .with_timezone(&Local)
                    .format("%Y-%m-%d")
                    .to_string();

                vec![
                    self.paint(&task.id, "33"),
                    done,
                    category,
                    task.text.clone(),
                    tags,
                    created,
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)?;

        if view.active_filters > 0 {
            writeln!(
                out,
                "{} of {} tasks shown ({} filter{} active)",
                view.tasks.len(),
                view.total,
                view.active_filters,
                if view.active_filters == 1 { "" } else { "s" }
            )?;
        }
        Ok(())
    }

    pub fn print_categories(&self, categories: &[Category]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers = vec!["ID".to_string(), "Name".to_string(), "Color".to_string()];
        let rows = categories
            .iter()
            .map(|c| vec![self.paint(&c.id, "33"), c.name.clone(), c.color.clone()])
            .collect();

        write_table(&mut out, headers, rows)
    }

    pub fn print_filters(&self, filters: &FilterDescriptor) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        write_filters(&mut out, filters)
    }

    pub fn print_tags(&self, tags: &[String]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        for tag in tags {
            writeln!(out, "{tag}")?;
        }
        Ok(())
    }

    pub fn print_status(&self, report: &StatusReport) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let network = if report.offline {
            self.paint("offline", "31")
        } else {
            self.paint("online", "32")
        };

        writeln!(out, "api         {}", report.api_url)?;
        writeln!(out, "network     {network}")?;
        writeln!(
            out,
            "tasks       {:?}, {} loaded",
            report.tasks.0, report.tasks.1
        )?;
        writeln!(
            out,
            "categories  {:?}, {} loaded",
            report.categories.0, report.categories.1
        )?;
        for err in &report.errors {
            writeln!(out, "error       {}", self.paint(&err.to_string(), "31"))?;
        }
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_filters<W: Write>(mut out: W, filters: &FilterDescriptor) -> anyhow::Result<()> {
    let join = |items: &std::collections::BTreeSet<String>| {
        if items.is_empty() {
            "-".to_string()
        } else {
            items.iter().cloned().collect::<Vec<_>>().join(", ")
        }
    };

    writeln!(out, "status      {:?}", filters.completion_status)?;
    writeln!(out, "categories  {}", join(&filters.category_ids))?;
    writeln!(
        out,
        "tags        {} (match {:?})",
        join(&filters.tags),
        filters.tag_condition
    )?;
    let search = filters.search_text.trim();
    writeln!(
        out,
        "search      {}",
        if search.is_empty() { "-" } else { search }
    )?;
    writeln!(out, "active      {}", active_filter_count(filters))?;
    Ok(())
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, &width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for &width in &widths {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(&widths) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
