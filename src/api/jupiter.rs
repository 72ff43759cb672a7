use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;

use super::{SwapQuote, SwapService};

// Jupiter Swap API v1
// Docs: https://dev.jup.ag/docs/swap-api/get-quote
const JUPITER_API_BASE: &str = "https://lite-api.jup.ag/swap/v1";

/// Client for the Jupiter aggregator API.
#[derive(Clone)]
pub struct JupiterClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    in_amount: String,
    out_amount: String,
    #[serde(default)]
    price_impact_pct: Option<String>,
}

/// One instruction as serialized by the swap-instructions endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInstruction {
    program_id: String,
    accounts: Vec<WireAccountMeta>,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAccountMeta {
    pubkey: String,
    is_signer: bool,
    is_writable: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapInstructionsResponse {
    // computeBudgetInstructions are ignored: the submitter attaches its
    // own priority-fee instruction per attempt.
    #[serde(default)]
    setup_instructions: Vec<WireInstruction>,
    swap_instruction: WireInstruction,
    #[serde(default)]
    cleanup_instruction: Option<WireInstruction>,
    #[serde(default)]
    address_lookup_table_addresses: Vec<String>,
}

impl JupiterClient {
    pub fn new() -> Self {
        Self::with_base_url(JUPITER_API_BASE.to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }
}

impl Default for JupiterClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SwapService for JupiterClient {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<SwapQuote> {
        let url = format!(
            "{}/quote?inputMint={}&outputMint={}&amount={}&slippageBps={}",
            self.base_url, input_mint, output_mint, amount, slippage_bps
        );

        let raw: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .await
            .context("jupiter quote request failed")?
            .error_for_status()
            .context("jupiter quote returned error status")?
            .json()
            .await
            .context("jupiter quote was not valid JSON")?;

        let parsed: QuoteResponse =
            serde_json::from_value(raw.clone()).context("unexpected jupiter quote shape")?;

        Ok(SwapQuote {
            input_mint: input_mint.to_string(),
            output_mint: output_mint.to_string(),
            in_amount: parsed.in_amount.parse().context("unparseable inAmount")?,
            out_amount: parsed.out_amount.parse().context("unparseable outAmount")?,
            price_impact_pct: parsed
                .price_impact_pct
                .and_then(|p| p.parse().ok())
                .unwrap_or(0.0),
            raw,
        })
    }

    async fn swap_instructions(
        &self,
        quote: &SwapQuote,
        user: &Pubkey,
    ) -> Result<Vec<Instruction>> {
        let url = format!("{}/swap-instructions", self.base_url);
        let body = json!({
            "quoteResponse": quote.raw,
            "userPublicKey": user.to_string(),
            "wrapAndUnwrapSol": true,
        });

        let response: SwapInstructionsResponse = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("jupiter swap-instructions request failed")?
            .error_for_status()
            .context("jupiter swap-instructions returned error status")?
            .json()
            .await
            .context("jupiter swap-instructions was not valid JSON")?;

        // The submitter compiles a v0 message without lookup tables; a
        // route that needs them cannot be signed correctly here.
        anyhow::ensure!(
            response.address_lookup_table_addresses.is_empty(),
            "route requires address lookup tables; retry with a simpler route"
        );

        let mut instructions = Vec::new();
        for wire in response
            .setup_instructions
            .iter()
            .chain(std::iter::once(&response.swap_instruction))
            .chain(response.cleanup_instruction.iter())
        {
            instructions.push(decode_instruction(wire)?);
        }

        Ok(instructions)
    }
}

fn decode_instruction(wire: &WireInstruction) -> Result<Instruction> {
    let program_id =
        Pubkey::from_str(&wire.program_id).context("invalid instruction program id")?;

    let accounts = wire
        .accounts
        .iter()
        .map(|a| {
            let pubkey = Pubkey::from_str(&a.pubkey).context("invalid account pubkey")?;
            Ok(if a.is_writable {
                AccountMeta::new(pubkey, a.is_signer)
            } else {
                AccountMeta::new_readonly(pubkey, a.is_signer)
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let data = base64::engine::general_purpose::STANDARD
        .decode(&wire.data)
        .context("instruction data is not valid base64")?;

    Ok(Instruction {
        program_id,
        accounts,
        data,
    })
}
