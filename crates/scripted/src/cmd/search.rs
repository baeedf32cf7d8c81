use scripted_mux::{ConnectionManager, UdsDialer};
use scripted_search::{DoneStatus, SearchKind, SearchListener, SearchOptions, SearchSession};
use serde_json::Value;

use crate::cmd::{parse_duration, SearchArgs};
use crate::exit::{search_error, CliResult, SUCCESS};
use crate::output::{print_done, print_hits, OutputFormat};

/// Prints results as they arrive.
struct HitPrinter {
    format: OutputFormat,
    max_results: Option<u64>,
    added: usize,
    revoked: usize,
}

impl SearchListener for HitPrinter {
    fn options(&self) -> SearchOptions {
        match self.max_results {
            Some(max) => SearchOptions::new().with_max_results(max),
            None => SearchOptions::new(),
        }
    }

    fn add(&mut self, items: Vec<Value>) {
        self.added += items.len();
        print_hits("add", &items, self.format);
    }

    fn revoke(&mut self, items: Vec<Value>) {
        self.revoked += items.len();
        print_hits("revoke", &items, self.format);
    }

    fn done(&mut self, status: DoneStatus) {
        print_done(status.is_paused(), self.format);
    }
}

pub fn run(args: SearchArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let kind = if args.text {
        SearchKind::Text
    } else {
        SearchKind::Files
    };

    let manager = ConnectionManager::new(UdsDialer::new(&args.path));
    let printer = HitPrinter {
        format,
        max_results: args.max_results,
        added: 0,
        revoked: 0,
    };
    let mut session = SearchSession::open(&manager, kind, args.root, args.query, printer)
        .map_err(|err| search_error("search failed to start", err))?;

    let mut requeries = args.requery.into_iter();
    loop {
        let status = session
            .run_until_done(Some(timeout))
            .map_err(|err| search_error("search failed", err))?;
        if status.is_paused() && args.all {
            session
                .more()
                .map_err(|err| search_error("resume failed", err))?;
            continue;
        }
        match requeries.next() {
            Some(query) => session
                .query(query)
                .map_err(|err| search_error("requery failed", err))?,
            None => break,
        }
    }

    let printer = session.listener();
    tracing::debug!(
        %kind,
        added = printer.added,
        revoked = printer.revoked,
        "search finished"
    );
    session.close();
    manager.disconnect();
    Ok(SUCCESS)
}
