//! CLI command handlers.

mod download;
mod info;
mod ocr;
mod search;

pub(crate) use download::run_download_command;
pub(crate) use info::run_info_command;
pub(crate) use ocr::run_ocr_command;
pub(crate) use search::run_search_command;
