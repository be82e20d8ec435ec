//! The MCP tools. Each one is a thin wrapper around the command of the same purpose.

use crate::args::{SearchArgs, ShowArgs, UpdateArgs};
use crate::commands;
use crate::mcp::mcp_utils::tool_result;
use crate::mcp::SpendlensServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::ErrorData as McpError;
use rmcp::{tool, tool_router};
use tracing::info;

#[tool_router(vis = "pub(super)")]
impl SpendlensServer {
    #[tool]
    /// Initialize the spendlens MCP service for this session and return usage instructions. You
    /// **MUST** call this **ONCE** before using other tools so that you have the full usage
    /// instructions. You **MAY** call it more than once if you have forgotten the usage
    /// instructions.
    async fn initialize_service(&self) -> Result<CallToolResult, McpError> {
        let mut initialized = self.initialized.lock().await;
        *initialized = true;
        Ok(CallToolResult::success(vec![rmcp::model::Content::text(
            include_str!("docs/INSTRUCTIONS.md"),
        )]))
    }

    /// Search the user's bank transactions.
    ///
    /// Transactions have been classified by a language model, so queries can name a merchant
    /// ("starbucks"), a category ("groceries"), a kind of transaction ("refund") or a free
    /// description ("flights to lisbon").
    ///
    /// # Parameters
    ///
    /// - `query`: The text to search for.
    /// - `mode`: `hybrid` (default) fuses full-text and semantic results, `text` uses full-text
    ///   search only, `vector` uses semantic similarity only.
    /// - `limit`: Maximum number of results.
    /// - `days`: Only include transactions from the last N days.
    /// - `since`: Only include transactions on or after this date, `YYYY-MM-DD`.
    /// - `order_by`: `relevance` (default) or `date` (newest first).
    /// - `threshold`: Minimum cosine similarity for semantic matches.
    ///
    /// # Returns
    ///
    /// A summary table followed by JSON with `results` (each with the transaction, its
    /// classification and its scores) and `total`, the number of matches before the limit.
    ///
    /// # Example
    ///
    /// ```json
    /// {
    ///   "query": "coffee",
    ///   "days": 30,
    ///   "order_by": "date"
    /// }
    /// ```
    #[tool]
    async fn search_transactions(
        &self,
        Parameters(args): Parameters<SearchArgs>,
    ) -> Result<CallToolResult, McpError> {
        require_init!(self);
        info!("MCP: search_transactions called with query '{}'", args.query());

        let config = (*self.config).clone();
        let out = commands::search(config, self.mode, args).await;
        tool_result(out)
    }

    /// Get one transaction and its full classification by ID.
    ///
    /// # Parameters
    ///
    /// - `id`: The 8 character transaction ID, as returned by `search_transactions`.
    #[tool]
    async fn get_transaction(
        &self,
        Parameters(args): Parameters<ShowArgs>,
    ) -> Result<CallToolResult, McpError> {
        require_init!(self);

        let config = (*self.config).clone();
        let out = commands::show(config, args).await;
        tool_result(out)
    }

    /// Correct the classification of one transaction.
    ///
    /// Only the fields that are provided are changed. The transaction's ID, date, amount and payee
    /// never change. Full-text search reflects the correction immediately.
    ///
    /// # Parameters
    ///
    /// - `id`: The 8 character transaction ID.
    /// - `merchant`: The corrected merchant name.
    /// - `type`: The corrected transaction type, e.g. `purchase`, `refund` or `transfer`.
    /// - `category`: The corrected category, e.g. `dining` or `subscriptions`.
    /// - `tags`: Replaces all tags.
    /// - `clear_tags`: Set to `true` to remove all tags.
    ///
    /// # Example
    ///
    /// ```json
    /// {
    ///   "id": "3fa94c1e",
    ///   "category": "subscriptions",
    ///   "tags": ["streaming"]
    /// }
    /// ```
    #[tool]
    async fn update_transaction(
        &self,
        Parameters(args): Parameters<UpdateArgs>,
    ) -> Result<CallToolResult, McpError> {
        require_init!(self);

        let config = (*self.config).clone();
        let out = commands::update(config, args).await;
        tool_result(out)
    }
}
