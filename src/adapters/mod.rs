// 外部系統的實作：reqwest 抓取頁面與 openings API
pub mod http;

pub use http::{browser_client, HttpOpeningsFetcher, HttpPageFetcher};
